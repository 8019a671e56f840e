use std::{fmt, str::FromStr};

use time::Date;

use super::location::LocationKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum EnergyType {
    Electricity,
    Heat,
    Gas,
}

impl EnergyType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Electricity => "electricity",
            Self::Heat => "heat",
            Self::Gas => "gas",
        }
    }
}

impl fmt::Display for EnergyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown energy type '{0}'")]
pub struct UnknownEnergyType(pub String);

impl FromStr for EnergyType {
    type Err = UnknownEnergyType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "electricity" | "power" => Ok(Self::Electricity),
            "heat" => Ok(Self::Heat),
            "gas" => Ok(Self::Gas),
            _ => Err(UnknownEnergyType(s.to_string())),
        }
    }
}

/// A meter as last seen by a full refresh. Never patched locally.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Meter {
    pub id: String,
    pub number: String,
    pub energy_type: EnergyType,
    pub street: String,
    pub postal_code: String,
    pub city: String,
    pub house_number: String,
    pub addition: Option<String>,
    pub last_reading: Option<f64>,
    pub last_reading_date: Option<Date>,
}

impl Meter {
    pub fn location_key(&self) -> LocationKey {
        LocationKey {
            street: self.street.clone(),
            postal_code: self.postal_code.clone(),
            city: self.city.clone(),
            house_number: self.house_number.clone(),
            addition: self.addition.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_type_parses_case_insensitively() {
        assert_eq!("Electricity".parse::<EnergyType>(), Ok(EnergyType::Electricity));
        assert_eq!(" GAS ".parse::<EnergyType>(), Ok(EnergyType::Gas));
        assert_eq!("heat".parse::<EnergyType>(), Ok(EnergyType::Heat));
        assert!("water".parse::<EnergyType>().is_err());
    }
}
