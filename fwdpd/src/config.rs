use std::{fs, io, path::Path};

use fwdp_common::{
    NumaSocket, CS_DEFAULT_INLINE_THRESHOLD, DEFAULT_CS_CAP_DIRECT, DEFAULT_CS_CAP_INDIRECT,
    DEFAULT_MAX_ENTRIES, MAX_BURST_SIZE, PIT_DEFAULT_LIFETIME_MS, PIT_MAX_LIFETIME_MS,
};
use fwdp_core::PcctConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pcct: PcctSection,
    pub mempool: MempoolSection,
    pub worker: WorkerSection,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcctSection {
    pub max_entries: usize,
    pub cs_cap_direct: usize,
    pub cs_cap_indirect: usize,
    pub cs_inline_threshold: usize,
    pub numa_socket: NumaSocket,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolSection {
    /// Packets available for Indirect CS records
    pub indirect_capacity: usize,
    /// Packets available to faces and the forwarder
    pub rx_capacity: usize,
    /// Segment size of copied packets
    pub dataroom: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub burst_size: usize,
    /// Upper bound applied to every Interest lifetime
    pub pit_lifetime_ms: u64,
    pub expire_interval_ms: u64,
    /// Size of the synthetic name space
    pub n_names: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for PcctSection {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            cs_cap_direct: DEFAULT_CS_CAP_DIRECT,
            cs_cap_indirect: DEFAULT_CS_CAP_INDIRECT,
            cs_inline_threshold: CS_DEFAULT_INLINE_THRESHOLD,
            numa_socket: NumaSocket::Any,
        }
    }
}

impl Default for MempoolSection {
    fn default() -> Self {
        Self {
            indirect_capacity: DEFAULT_CS_CAP_INDIRECT,
            rx_capacity: 8192,
            dataroom: 2048,
        }
    }
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            burst_size: MAX_BURST_SIZE,
            pit_lifetime_ms: PIT_DEFAULT_LIFETIME_MS,
            expire_interval_ms: 100,
            n_names: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if !path.as_ref().exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pcct_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let mp = &self.mempool;
        if mp.indirect_capacity == 0 || mp.rx_capacity == 0 || mp.dataroom == 0 {
            return Err(ConfigError::Invalid(
                "mempool capacities and dataroom must be positive".to_string(),
            ));
        }

        let w = &self.worker;
        if w.burst_size == 0 || w.burst_size > MAX_BURST_SIZE {
            return Err(ConfigError::Invalid(format!(
                "burst_size must be in 1..={}",
                MAX_BURST_SIZE
            )));
        }
        if w.pit_lifetime_ms == 0 || w.pit_lifetime_ms > PIT_MAX_LIFETIME_MS {
            return Err(ConfigError::Invalid(format!(
                "pit_lifetime_ms must be in 1..={}",
                PIT_MAX_LIFETIME_MS
            )));
        }
        if w.expire_interval_ms == 0 || w.expire_interval_ms > PIT_MAX_LIFETIME_MS {
            return Err(ConfigError::Invalid(format!(
                "expire_interval_ms must be in 1..={}",
                PIT_MAX_LIFETIME_MS
            )));
        }
        if w.n_names == 0 {
            return Err(ConfigError::Invalid("n_names must be positive".to_string()));
        }
        Ok(())
    }

    pub fn pcct_config(&self) -> PcctConfig {
        PcctConfig {
            max_entries: self.pcct.max_entries,
            cs_cap_direct: self.pcct.cs_cap_direct,
            cs_cap_indirect: self.pcct.cs_cap_indirect,
            cs_inline_threshold: self.pcct.cs_inline_threshold,
            socket: self.pcct.numa_socket,
        }
    }
}
