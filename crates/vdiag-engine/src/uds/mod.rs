//! Diagnostic service identifiers
//!
//! OBD-II modes, KWP2000 and UDS services share one byte space on the wire;
//! the engine only needs the identifiers it logs or synthesizes.

mod nrc;

pub use nrc::{NegativeResponseCode, NrcCategory};

/// Offset added to a request SID to form the positive response SID
pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

/// OBD-II (SAE J1979) modes
pub mod obd_mode {
    pub const CURRENT_DATA: u8 = 0x01;
    pub const FREEZE_FRAME: u8 = 0x02;
    pub const STORED_DTCS: u8 = 0x03;
    pub const CLEAR_DTCS: u8 = 0x04;
    pub const O2_MONITORING: u8 = 0x05;
    pub const ON_BOARD_MONITORING: u8 = 0x06;
    pub const PENDING_DTCS: u8 = 0x07;
    pub const CONTROL_OPERATION: u8 = 0x08;
    pub const VEHICLE_INFO: u8 = 0x09;
    pub const PERMANENT_DTCS: u8 = 0x0A;
}

/// UDS (ISO 14229) and KWP2000 service identifiers
pub mod service_id {
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    pub const ECU_RESET: u8 = 0x11;
    pub const CLEAR_DIAGNOSTIC_INFO: u8 = 0x14;
    pub const READ_DTC_BY_STATUS: u8 = 0x18;
    pub const READ_DTC_INFO: u8 = 0x19;
    pub const READ_ECU_ID: u8 = 0x1A;
    pub const READ_DATA_BY_LOCAL_ID: u8 = 0x21;
    pub const READ_DATA_BY_ID: u8 = 0x22;
    pub const SECURITY_ACCESS: u8 = 0x27;
    pub const COMMUNICATION_CONTROL: u8 = 0x28;
    pub const IO_CONTROL_BY_LOCAL_ID: u8 = 0x30;
    pub const WRITE_DATA_BY_ID: u8 = 0x2E;
    pub const IO_CONTROL_BY_ID: u8 = 0x2F;
    pub const ROUTINE_CONTROL: u8 = 0x31;
    pub const REQUEST_DOWNLOAD: u8 = 0x34;
    pub const REQUEST_UPLOAD: u8 = 0x35;
    pub const TRANSFER_DATA: u8 = 0x36;
    pub const REQUEST_TRANSFER_EXIT: u8 = 0x37;
    pub const WRITE_DATA_BY_LOCAL_ID: u8 = 0x3B;
    pub const WRITE_MEMORY_BY_ADDRESS: u8 = 0x3D;
    pub const TESTER_PRESENT: u8 = 0x3E;
    pub const CONTROL_DTC_SETTING: u8 = 0x85;
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;
}

/// Human-readable service name for logs and prompts
pub fn service_name(sid: u8) -> &'static str {
    match sid {
        obd_mode::CURRENT_DATA => "OBD current data",
        obd_mode::FREEZE_FRAME => "OBD freeze frame",
        obd_mode::STORED_DTCS => "OBD stored DTCs",
        obd_mode::CLEAR_DTCS => "OBD clear DTCs",
        obd_mode::O2_MONITORING => "OBD O2 sensor monitoring",
        obd_mode::ON_BOARD_MONITORING => "OBD on-board monitoring",
        obd_mode::PENDING_DTCS => "OBD pending DTCs",
        obd_mode::CONTROL_OPERATION => "OBD control operation",
        obd_mode::VEHICLE_INFO => "OBD vehicle information",
        obd_mode::PERMANENT_DTCS => "OBD permanent DTCs",
        service_id::DIAGNOSTIC_SESSION_CONTROL => "DiagnosticSessionControl",
        service_id::ECU_RESET => "ECUReset",
        service_id::CLEAR_DIAGNOSTIC_INFO => "ClearDiagnosticInformation",
        service_id::READ_DTC_BY_STATUS => "ReadDTCByStatus",
        service_id::READ_DTC_INFO => "ReadDTCInformation",
        service_id::READ_ECU_ID => "ReadECUIdentification",
        service_id::READ_DATA_BY_LOCAL_ID => "ReadDataByLocalIdentifier",
        service_id::READ_DATA_BY_ID => "ReadDataByIdentifier",
        service_id::SECURITY_ACCESS => "SecurityAccess",
        service_id::COMMUNICATION_CONTROL => "CommunicationControl",
        service_id::IO_CONTROL_BY_LOCAL_ID => "InputOutputControlByLocalIdentifier",
        service_id::WRITE_DATA_BY_ID => "WriteDataByIdentifier",
        service_id::IO_CONTROL_BY_ID => "InputOutputControlByIdentifier",
        service_id::ROUTINE_CONTROL => "RoutineControl",
        service_id::REQUEST_DOWNLOAD => "RequestDownload",
        service_id::REQUEST_UPLOAD => "RequestUpload",
        service_id::TRANSFER_DATA => "TransferData",
        service_id::REQUEST_TRANSFER_EXIT => "RequestTransferExit",
        service_id::WRITE_DATA_BY_LOCAL_ID => "WriteDataByLocalIdentifier",
        service_id::WRITE_MEMORY_BY_ADDRESS => "WriteMemoryByAddress",
        service_id::TESTER_PRESENT => "TesterPresent",
        service_id::CONTROL_DTC_SETTING => "ControlDTCSetting",
        _ => "unknown service",
    }
}
