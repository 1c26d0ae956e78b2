//! Vehicle identity used to key knowledge records

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Make/model/year triple identifying one vehicle's rule set
///
/// Make and model compare case-insensitively with surrounding whitespace
/// ignored, the same way [`VehicleId::slug`] folds them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleId {
    pub make: String,
    pub model: String,
    pub year: u16,
}

impl VehicleId {
    pub fn new(make: impl Into<String>, model: impl Into<String>, year: u16) -> Self {
        Self {
            make: make.into(),
            model: model.into(),
            year,
        }
    }

    /// File-system friendly key, one per distinct vehicle
    ///
    /// Parts are lowercased and joined with `_`. Every byte other than an
    /// ASCII letter or digit is written as `%XX`, so `_` never appears inside
    /// a part and two vehicles never share a key.
    ///
    /// `VehicleId::new("Land Rover", "Range_Rover", 2012)` → `land%20rover_range%5Frover_2012`
    pub fn slug(&self) -> String {
        format!(
            "{}_{}_{}",
            escape_part(&self.make),
            escape_part(&self.model),
            self.year
        )
    }

    fn folded(&self) -> (String, String, u16) {
        (fold(&self.make), fold(&self.model), self.year)
    }
}

fn fold(part: &str) -> String {
    part.trim().to_lowercase()
}

fn escape_part(part: &str) -> String {
    let mut out = String::new();
    for byte in fold(part).bytes() {
        if byte.is_ascii_alphanumeric() {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

impl PartialEq for VehicleId {
    fn eq(&self, other: &Self) -> bool {
        self.folded() == other.folded()
    }
}

impl Eq for VehicleId {}

impl Hash for VehicleId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded().hash(state);
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.make, self.model, self.year)
    }
}

/// Parses `make/model/year`
impl FromStr for VehicleId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').map(str::trim).collect();
        if parts.len() != 3 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(format!("expected make/model/year, got '{}'", s));
        }
        let year = parts[2]
            .parse::<u16>()
            .map_err(|_| format!("invalid model year: '{}'", parts[2]))?;
        Ok(Self::new(parts[0], parts[1], year))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vehicle() {
        let id: VehicleId = "Ford/Focus/2015".parse().unwrap();
        assert_eq!(id, VehicleId::new("Ford", "Focus", 2015));
        assert_eq!(id.to_string(), "Ford Focus 2015");
        assert!("Ford/Focus".parse::<VehicleId>().is_err());
        assert!("Ford/Focus/twenty".parse::<VehicleId>().is_err());
        assert!("/Focus/2015".parse::<VehicleId>().is_err());
    }

    #[test]
    fn test_slug() {
        assert_eq!(VehicleId::new("Ford", "Focus", 2015).slug(), "ford_focus_2015");
        assert_eq!(
            VehicleId::new("Land Rover", "Range-Rover", 2012).slug(),
            "land%20rover_range%2Drover_2012"
        );
        assert_eq!(
            VehicleId::new("Citroën", "C4", 2010).slug(),
            "citro%C3%ABn_c4_2010"
        );
    }

    #[test]
    fn test_distinct_vehicles_never_share_a_slug() {
        let pairs = [
            (
                VehicleId::new("Land Rover", "Defender", 2012),
                VehicleId::new("Land", "Rover Defender", 2012),
            ),
            (
                VehicleId::new("Land_Rover", "Defender", 2012),
                VehicleId::new("Land", "Rover_Defender", 2012),
            ),
            (
                VehicleId::new("Mini", "Cooper S", 2012),
                VehicleId::new("Mini", "Cooper-S", 2012),
            ),
            (
                VehicleId::new("A", "B_2012", 2013),
                VehicleId::new("A_B", "2012", 2013),
            ),
        ];
        for (a, b) in pairs {
            assert_ne!(a, b);
            assert_ne!(a.slug(), b.slug(), "{} / {}", a, b);
        }
    }

    #[test]
    fn test_equal_vehicles_share_a_slug() {
        let a = VehicleId::new("Ford", "Focus", 2015);
        let b = VehicleId::new(" FORD", "focus ", 2015);
        assert_eq!(a, b);
        assert_eq!(a.slug(), b.slug());
        assert_ne!(a, VehicleId::new("Ford", "Focus", 2016));
    }
}
