//! Typed device parameters and register mapping of the 7-in-1 soil probe.
//!
//! The probe exposes seven holding registers starting at address `0x0000`:
//!
//! | Register | Content                       | Scaling |
//! |----------|-------------------------------|---------|
//! | 0        | Soil moisture (%)             | / 10    |
//! | 1        | Soil temperature (°C)         | / 10    |
//! | 2        | Conductivity (not mapped)     | -       |
//! | 3        | pH                            | / 10    |
//! | 4        | Nitrogen (mg/kg)              | 1       |
//! | 5        | Phosphorus (mg/kg)            | 1       |
//! | 6        | Potassium (mg/kg)             | 1       |
//!
//! Register 2 travels on the wire but is deliberately not part of
//! [`SensorReading`].
use std::{fmt, ops::Deref, str::FromStr};

/// Errors of the typed protocol parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The address is outside `1..=247`.
    #[error("The address value {0} is outside the valid range of {min} to {max}", min = Address::MIN, max = Address::MAX)]
    AddressOutOfRange(u8),

    /// The baud rate is not supported by the probe.
    #[error("Unsupported baud rate {0}, valid values are 2400, 4800 and 9600")]
    InvalidBaudRate(u16),

    /// The field name is unknown.
    #[error("Unknown field '{0}'")]
    UnknownField(String),
}

/// Modbus function code "read holding registers".
pub const READ_HOLDING_REGISTERS: u8 = 0x03;

/// Modbus RTU slave address of the probe.
///
/// Valid addresses are `1..=247`, the factory default is `0x01`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct Address(u8);

impl Address {
    /// Lowest assignable slave address.
    pub const MIN: u8 = 1;
    /// Highest assignable slave address.
    pub const MAX: u8 = 247;
}

impl Deref for Address {
    type Target = u8;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Default for Address {
    fn default() -> Self {
        Self(0x01)
    }
}

impl TryFrom<u8> for Address {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::AddressOutOfRange(value))
        }
    }
}

impl From<Address> for u8 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Serial baud rates supported by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u16", into = "u16"))]
pub enum BaudRate {
    B2400,
    B4800,
    #[default]
    B9600,
}

impl BaudRate {
    /// All supported rates, fastest first.
    pub const ALL: [BaudRate; 3] = [BaudRate::B9600, BaudRate::B4800, BaudRate::B2400];
}

impl TryFrom<u16> for BaudRate {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            2400 => Ok(Self::B2400),
            4800 => Ok(Self::B4800),
            9600 => Ok(Self::B9600),
            _ => Err(Error::InvalidBaudRate(value)),
        }
    }
}

impl From<&BaudRate> for u16 {
    fn from(baud_rate: &BaudRate) -> Self {
        match baud_rate {
            BaudRate::B2400 => 2400,
            BaudRate::B4800 => 4800,
            BaudRate::B9600 => 9600,
        }
    }
}

impl From<BaudRate> for u16 {
    fn from(baud_rate: BaudRate) -> Self {
        u16::from(&baud_rate)
    }
}

impl From<BaudRate> for u32 {
    fn from(baud_rate: BaudRate) -> Self {
        u16::from(&baud_rate) as u32
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u16::from(self))
    }
}

/// A named value of a [`SensorReading`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Field {
    Moisture,
    Temperature,
    Ph,
    Nitrogen,
    Phosphorus,
    Potassium,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Moisture,
        Field::Temperature,
        Field::Ph,
        Field::Nitrogen,
        Field::Phosphorus,
        Field::Potassium,
    ];

    /// Canonical lowercase name, also used as MQTT topic suffix.
    pub fn name(&self) -> &'static str {
        match self {
            Field::Moisture => "moisture",
            Field::Temperature => "temperature",
            Field::Ph => "ph",
            Field::Nitrogen => "nitrogen",
            Field::Phosphorus => "phosphorus",
            Field::Potassium => "potassium",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Field::Moisture => "%",
            Field::Temperature => "°C",
            Field::Ph => "pH",
            Field::Nitrogen | Field::Phosphorus | Field::Potassium => "mg/kg",
        }
    }
}

impl FromStr for Field {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "moisture" | "humidity" | "hum" => Ok(Field::Moisture),
            "temperature" | "temp" => Ok(Field::Temperature),
            "ph" => Ok(Field::Ph),
            "nitrogen" | "n" => Ok(Field::Nitrogen),
            "phosphorus" | "p" => Ok(Field::Phosphorus),
            "potassium" | "k" => Ok(Field::Potassium),
            _ => Err(Error::UnknownField(s.to_string())),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The value of a single [`Field`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum FieldValue {
    /// A register divided by 10.
    Scaled(f32),
    /// A raw register count.
    Count(u16),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Scaled(value) => write!(f, "{value:.1}"),
            FieldValue::Count(value) => write!(f, "{value}"),
        }
    }
}

/// One decoded measurement of the probe.
///
/// Only ever built from a complete, checksum-verified register block.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorReading {
    /// Volumetric water content in %.
    pub moisture: f32,
    /// Soil temperature in °C.
    pub temperature: f32,
    pub ph: f32,
    /// Nitrogen in mg/kg.
    pub nitrogen: u16,
    /// Phosphorus in mg/kg.
    pub phosphorus: u16,
    /// Potassium in mg/kg.
    pub potassium: u16,
}

impl SensorReading {
    /// First holding register of the measurement block.
    pub const ADDRESS: u16 = 0x0000;
    /// Number of holding registers of the measurement block.
    pub const QUANTITY: u16 = 7;

    /// Maps the seven holding registers to a reading.
    ///
    /// Register 2 is skipped.
    pub fn from_registers(words: &[u16; Self::QUANTITY as usize]) -> Self {
        Self {
            moisture: decode_scaled(words[0]),
            temperature: decode_scaled(words[1]),
            ph: decode_scaled(words[3]),
            nitrogen: words[4],
            phosphorus: words[5],
            potassium: words[6],
        }
    }

    /// Returns the value of one field.
    pub fn get(&self, field: Field) -> FieldValue {
        match field {
            Field::Moisture => FieldValue::Scaled(self.moisture),
            Field::Temperature => FieldValue::Scaled(self.temperature),
            Field::Ph => FieldValue::Scaled(self.ph),
            Field::Nitrogen => FieldValue::Count(self.nitrogen),
            Field::Phosphorus => FieldValue::Count(self.phosphorus),
            Field::Potassium => FieldValue::Count(self.potassium),
        }
    }

    /// Iterates all fields in register order.
    pub fn iter(&self) -> impl Iterator<Item = (Field, FieldValue)> + '_ {
        Field::ALL.into_iter().map(move |field| (field, self.get(field)))
    }
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, value) in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{field}={value}")?;
            if field != Field::Ph {
                write!(f, "{}", field.unit())?;
            }
        }
        Ok(())
    }
}

fn decode_scaled(word: u16) -> f32 {
    word as f32 / 10.0
}
