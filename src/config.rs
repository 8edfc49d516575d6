//! Runtime configuration of the ranging profile, parsed from the stack's
//! `INIT_<flag>=<value>` strings

use std::{collections::BTreeMap, fmt, str::FromStr};

use log::{error, LevelFilter};

/// Feature bit: real-time ranging data
pub const FEATURE_REAL_TIME_RANGING: u32 = 1 << 0;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangingConfig {
    /// The profile refuses to start unless set
    pub experimental: bool,
    /// Served from the Features characteristic
    pub features: u32,
    /// Applied when the profile starts
    pub log_level: LevelFilter,
}

impl Default for RangingConfig {
    fn default() -> Self {
        Self {
            experimental: false,
            features: FEATURE_REAL_TIME_RANGING,
            log_level: LevelFilter::Info,
        }
    }
}

fn parse_features(value: &str) -> Result<u32, std::num::ParseIntError> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    }
}

impl RangingConfig {
    /// Parse `INIT_<flag>=<value>` strings. Malformed or unknown flags are
    /// logged and ignored; a value that fails to parse keeps the default.
    pub fn parse(flags: Vec<String>) -> Self {
        let mut config = Self::default();

        for flag in flags {
            let values: Vec<&str> = flag.split('=').collect();
            if values.len() != 2 {
                error!("Bad flag {flag}, must be in <FLAG>=<VALUE> format");
                continue;
            }

            match values[0] {
                "INIT_ras_experimental" => match values[1].parse() {
                    Ok(experimental) => config.experimental = experimental,
                    Err(e) => error!("Parse failure on '{flag}': {e}"),
                },
                "INIT_ras_features" => match parse_features(values[1]) {
                    Ok(features) => config.features = features,
                    Err(e) => error!("Parse failure on '{flag}': {e}"),
                },
                "INIT_ras_log_level" => match LevelFilter::from_str(values[1]) {
                    Ok(level) => config.log_level = level,
                    Err(e) => error!("Parse failure on '{flag}': {e}"),
                },
                _ => error!("Unsaved flag: {} = {}", values[0], values[1]),
            }
        }

        config
    }

    /// Dumps all flag K-V pairs, storing values as strings
    pub fn dump(&self) -> BTreeMap<&'static str, String> {
        [
            ("ras_experimental", self.experimental.to_string()),
            ("ras_features", format!("{:#010x}", self.features)),
            ("ras_log_level", self.log_level.to_string()),
        ]
        .into()
    }
}

impl fmt::Display for RangingConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let pairs = self.dump().into_iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>();
        write!(f, "{}", pairs.join(","))
    }
}
