// src/utils/id_generator.rs
use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdType {
    Rider,
    Driver,
    Trip,
    Payment,
    Review,
}

impl IdType {
    pub fn to_prefix(&self) -> &'static str {
        match self {
            IdType::Rider => "rdr",
            IdType::Driver => "drv",
            IdType::Trip => "trp",
            IdType::Payment => "pay",
            IdType::Review => "rev",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "rdr" => Some(IdType::Rider),
            "drv" => Some(IdType::Driver),
            "trp" => Some(IdType::Trip),
            "pay" => Some(IdType::Payment),
            "rev" => Some(IdType::Review),
            _ => None,
        }
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_prefix())
    }
}

pub struct IdGenerator;

impl IdGenerator {
    /// Generate a unique ID with format: {prefix}-{yymmdd}-{suffix}
    /// where suffix is 8 lowercase alphanumeric characters.
    pub fn generate(id_type: IdType) -> String {
        Self::generate_with_timestamp(id_type, Utc::now())
    }

    /// Generate ID with a specific timestamp (useful for testing)
    pub fn generate_with_timestamp(id_type: IdType, timestamp: DateTime<Utc>) -> String {
        let date_part = timestamp.format("%y%m%d").to_string();
        format!("{}-{}-{}", id_type.to_prefix(), date_part, Self::random_suffix())
    }

    fn random_suffix() -> String {
        const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::rng();
        (0..SUFFIX_LEN)
            .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
            .collect()
    }

    /// Parse an ID to extract its components
    pub fn parse_id(id: &str) -> Result<ParsedId, IdError> {
        let mut parts = id.split('-');
        let (Some(prefix), Some(date_part), Some(suffix), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(IdError::InvalidFormat);
        };

        if date_part.len() != 6
            || !date_part.chars().all(|c| c.is_ascii_digit())
            || suffix.len() != SUFFIX_LEN
            || !suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(IdError::InvalidFormat);
        }

        let id_type =
            IdType::from_prefix(prefix).ok_or_else(|| IdError::UnknownType(prefix.to_string()))?;

        let year = 2000 + date_part[0..2].parse::<i32>().map_err(|_| IdError::InvalidDate)?;
        let month = date_part[2..4].parse::<u32>().map_err(|_| IdError::InvalidDate)?;
        let day = date_part[4..6].parse::<u32>().map_err(|_| IdError::InvalidDate)?;

        let parsed = ParsedId {
            id_type,
            year,
            month,
            day,
            random_suffix: suffix.to_string(),
        };
        // Rejects calendar-impossible dates such as 31 February.
        if parsed.to_datetime().is_none() {
            return Err(IdError::InvalidDate);
        }
        Ok(parsed)
    }

    /// Validate if an ID matches the expected format and type
    pub fn validate_id(id: &str, expected_type: Option<IdType>) -> bool {
        match Self::parse_id(id) {
            Ok(parsed) => expected_type.is_none_or(|expected| parsed.id_type == expected),
            Err(_) => false,
        }
    }
}

const SUFFIX_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedId {
    pub id_type: IdType,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub random_suffix: String,
}

impl ParsedId {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.with_ymd_and_hms(self.year, self.month, self.day, 0, 0, 0).single()
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum IdError {
    #[error("Invalid ID format")]
    InvalidFormat,

    #[error("Unknown ID type: {0}")]
    UnknownType(String),

    #[error("Invalid date component in ID")]
    InvalidDate,
}

pub trait WithGeneratedId {
    fn set_generated_id(&mut self, id_type: IdType);

    fn with_generated_id(mut self, id_type: IdType) -> Self
    where
        Self: Sized,
    {
        self.set_generated_id(id_type);
        self
    }
}

macro_rules! impl_with_generated_id {
    ($($model:ty),* $(,)?) => {
        $(
            impl WithGeneratedId for $model {
                fn set_generated_id(&mut self, id_type: IdType) {
                    self.id = IdGenerator::generate(id_type);
                }
            }
        )*
    };
}

impl_with_generated_id!(
    crate::models::rider::Rider,
    crate::models::driver::Driver,
    crate::models::trip::Trip,
    crate::models::payment::Payment,
    crate::models::review::Review,
);
