//! Encoder thread policy.
//!
//! Resolves a user-facing thread choice into the thread count carried by a
//! [`JobSpec`](crate::job::JobSpec), where 0 means the encoder decides.

use serde::{Deserialize, Serialize};

/// How many encoder threads to request for CPU jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThreadPolicy {
    /// Let the encoder pick.
    #[default]
    Auto,
    AllCores,
    HalfCores,
    Fixed(u32),
}

impl ThreadPolicy {
    /// Resolve against the detected logical core count.
    pub fn resolve(&self) -> u32 {
        self.resolve_for(num_cpus::get() as u32)
    }

    /// Resolve against an explicit core count.
    pub fn resolve_for(&self, cores: u32) -> u32 {
        let cores = cores.max(1);
        match self {
            ThreadPolicy::Auto => 0,
            ThreadPolicy::AllCores => cores,
            ThreadPolicy::HalfCores => (cores / 2).max(1),
            ThreadPolicy::Fixed(n) => *n,
        }
    }
}

impl std::str::FromStr for ThreadPolicy {
    type Err = String;

    /// Accepts `auto`, `all`, `half`, or a number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "0" => Ok(ThreadPolicy::Auto),
            "all" => Ok(ThreadPolicy::AllCores),
            "half" => Ok(ThreadPolicy::HalfCores),
            other => other
                .parse::<u32>()
                .map(ThreadPolicy::Fixed)
                .map_err(|_| {
                    format!(
                        "invalid thread policy '{}': expected auto, all, half or a number",
                        s
                    )
                }),
        }
    }
}
