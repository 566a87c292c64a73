use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(CustomerUserId);
id_newtype!(DeveloperId);
id_newtype!(VendorProductId);
id_newtype!(ProfileId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ProfileUpdated,
    PromoReceived,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ProfileUpdated => "profile_updated",
            EventKind::PromoReceived => "promo_received",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    None,
    Errors,
    #[default]
    Info,
    Verbose,
}

impl LogLevel {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Some(LogLevel::None),
            "errors" | "error" => Some(LogLevel::Errors),
            "info" => Some(LogLevel::Info),
            "verbose" | "debug" | "trace" => Some(LogLevel::Verbose),
            _ => None,
        }
    }

    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn filter_directive(self) -> &'static str {
        match self {
            LogLevel::None => "off",
            LogLevel::Errors => "error",
            LogLevel::Info => "info",
            LogLevel::Verbose => "debug",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Female,
    Male,
    Other,
}
