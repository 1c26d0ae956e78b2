//! Negative Response Codes (NRC)
//!
//! Shared by UDS (ISO 14229) and KWP2000; OBD-II modes reuse the same
//! `7F <sid> <nrc>` frame.

use std::fmt;

use serde::{Serialize, Serializer};

/// How the engine reacts to a negative response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NrcCategory {
    /// Security access required or refused; retry with a different approach
    Security,
    /// Parameters outside the accepted range
    OutOfRange,
    /// ECU accepted the request and will answer later
    Pending,
    /// Any other refusal
    Rejected,
}

/// Negative response code byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NegativeResponseCode(pub u8);

macro_rules! nrc_table {
    ($($name:ident = $code:literal, $label:literal;)*) => {
        impl NegativeResponseCode {
            $(pub const $name: Self = Self($code);)*

            /// Standard name, if the code is not reserved
            pub fn name(&self) -> Option<&'static str> {
                match self.0 {
                    $($code => Some($label),)*
                    _ => None,
                }
            }
        }
    };
}

nrc_table! {
    GENERAL_REJECT = 0x10, "generalReject";
    SERVICE_NOT_SUPPORTED = 0x11, "serviceNotSupported";
    SUB_FUNCTION_NOT_SUPPORTED = 0x12, "subFunctionNotSupported";
    INCORRECT_MESSAGE_LENGTH = 0x13, "incorrectMessageLengthOrInvalidFormat";
    RESPONSE_TOO_LONG = 0x14, "responseTooLong";
    BUSY_REPEAT_REQUEST = 0x21, "busyRepeatRequest";
    CONDITIONS_NOT_CORRECT = 0x22, "conditionsNotCorrect";
    REQUEST_SEQUENCE_ERROR = 0x24, "requestSequenceError";
    NO_RESPONSE_FROM_SUBNET = 0x25, "noResponseFromSubnetComponent";
    FAILURE_PREVENTS_EXECUTION = 0x26, "failurePreventsExecutionOfRequestedAction";
    REQUEST_OUT_OF_RANGE = 0x31, "requestOutOfRange";
    SECURITY_ACCESS_DENIED = 0x33, "securityAccessDenied";
    INVALID_KEY = 0x35, "invalidKey";
    EXCEEDED_NUMBER_OF_ATTEMPTS = 0x36, "exceededNumberOfAttempts";
    REQUIRED_TIME_DELAY_NOT_EXPIRED = 0x37, "requiredTimeDelayNotExpired";
    UPLOAD_DOWNLOAD_NOT_ACCEPTED = 0x70, "uploadDownloadNotAccepted";
    TRANSFER_DATA_SUSPENDED = 0x71, "transferDataSuspended";
    GENERAL_PROGRAMMING_FAILURE = 0x72, "generalProgrammingFailure";
    WRONG_BLOCK_SEQUENCE_COUNTER = 0x73, "wrongBlockSequenceCounter";
    RESPONSE_PENDING = 0x78, "requestCorrectlyReceived-ResponsePending";
    SUB_FUNCTION_NOT_SUPPORTED_IN_SESSION = 0x7E, "subFunctionNotSupportedInActiveSession";
    SERVICE_NOT_SUPPORTED_IN_SESSION = 0x7F, "serviceNotSupportedInActiveSession";
    RPM_TOO_HIGH = 0x81, "rpmTooHigh";
    RPM_TOO_LOW = 0x82, "rpmTooLow";
    ENGINE_RUNNING = 0x83, "engineIsRunning";
    ENGINE_NOT_RUNNING = 0x84, "engineIsNotRunning";
    ENGINE_RUN_TIME_TOO_LOW = 0x85, "engineRunTimeTooLow";
    TEMPERATURE_TOO_HIGH = 0x86, "temperatureTooHigh";
    TEMPERATURE_TOO_LOW = 0x87, "temperatureTooLow";
    VEHICLE_SPEED_TOO_HIGH = 0x88, "vehicleSpeedTooHigh";
    VEHICLE_SPEED_TOO_LOW = 0x89, "vehicleSpeedTooLow";
    THROTTLE_TOO_HIGH = 0x8A, "throttlePedalTooHigh";
    THROTTLE_TOO_LOW = 0x8B, "throttlePedalTooLow";
    TRANSMISSION_NOT_IN_NEUTRAL = 0x8C, "transmissionRangeNotInNeutral";
    TRANSMISSION_NOT_IN_GEAR = 0x8D, "transmissionRangeNotInGear";
    BRAKE_SWITCH_NOT_CLOSED = 0x8F, "brakeSwitchNotClosed";
    SHIFTER_NOT_IN_PARK = 0x90, "shifterLeverNotInPark";
    TORQUE_CONVERTER_CLUTCH_LOCKED = 0x91, "torqueConverterClutchLocked";
    VOLTAGE_TOO_HIGH = 0x92, "voltageTooHigh";
    VOLTAGE_TOO_LOW = 0x93, "voltageTooLow";
}

impl NegativeResponseCode {
    pub fn code(&self) -> u8 {
        self.0
    }

    pub fn category(&self) -> NrcCategory {
        match *self {
            Self::SECURITY_ACCESS_DENIED
            | Self::INVALID_KEY
            | Self::EXCEEDED_NUMBER_OF_ATTEMPTS
            | Self::REQUIRED_TIME_DELAY_NOT_EXPIRED => NrcCategory::Security,
            Self::REQUEST_OUT_OF_RANGE => NrcCategory::OutOfRange,
            Self::RESPONSE_PENDING => NrcCategory::Pending,
            _ => NrcCategory::Rejected,
        }
    }

    /// Vehicle-state conditions (0x81..=0x93) the operator can usually fix
    pub fn is_vehicle_condition(&self) -> bool {
        (0x81..=0x93).contains(&self.0)
    }
}

impl From<u8> for NegativeResponseCode {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<NegativeResponseCode> for u8 {
    fn from(nrc: NegativeResponseCode) -> Self {
        nrc.0
    }
}

impl fmt::UpperHex for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}

impl fmt::Display for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:02X})", name, self.0),
            None => write!(f, "reserved (0x{:02X})", self.0),
        }
    }
}

impl Serialize for NegativeResponseCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:02X}", self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0x33, NrcCategory::Security)]
    #[case(0x35, NrcCategory::Security)]
    #[case(0x36, NrcCategory::Security)]
    #[case(0x37, NrcCategory::Security)]
    #[case(0x31, NrcCategory::OutOfRange)]
    #[case(0x78, NrcCategory::Pending)]
    #[case(0x22, NrcCategory::Rejected)]
    #[case(0xF0, NrcCategory::Rejected)]
    fn test_category(#[case] code: u8, #[case] expected: NrcCategory) {
        assert_eq!(NegativeResponseCode::from(code).category(), expected);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            NegativeResponseCode::SECURITY_ACCESS_DENIED.to_string(),
            "securityAccessDenied (0x33)"
        );
        assert_eq!(NegativeResponseCode(0xF0).to_string(), "reserved (0xF0)");
        assert_eq!(format!("{:X}", NegativeResponseCode(0x7E)), "7E");
        assert!(NegativeResponseCode::ENGINE_RUNNING.is_vehicle_condition());
        assert!(!NegativeResponseCode::GENERAL_REJECT.is_vehicle_condition());
    }
}
