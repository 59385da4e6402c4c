// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

/// How the synapse drivers of a bus are distributed among the requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationPolicy {
    /// First fit in driver order. With `enable_exclusive_first`, drivers that
    /// can serve only one request are handed out in a first pass.
    Greedy { enable_exclusive_first: bool },
    /// Exhaustive search, stopped after `max_duration_ms` if given. Falls
    /// back to the greedy result if nothing was found in time.
    Backtracking { max_duration_ms: Option<u64> },
}

impl Default for AllocationPolicy {
    fn default() -> Self {
        Self::Greedy {
            enable_exclusive_first: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingOptions {
    pub synapse_driver_allocation_policy: AllocationPolicy,
    /// Time budget for trying label assignments across all buses.
    pub synapse_driver_allocation_timeout_ms: Option<u64>,
}

impl RoutingOptions {
    pub fn from_file(file_name: &str) -> anyhow::Result<Self> {
        let file = File::open(Path::new(file_name))
            .with_context(|| format!("File {} not found", file_name))?;
        let reader = BufReader::new(file);
        serde_yaml::from_reader(reader)
            .with_context(|| format!("Malformed routing options in {}", file_name))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(options: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(options)?)
    }

    pub fn backtracking(max_duration: Option<Duration>) -> Self {
        Self {
            synapse_driver_allocation_policy: AllocationPolicy::Backtracking {
                max_duration_ms: max_duration.map(|d| d.as_millis() as u64),
            },
            synapse_driver_allocation_timeout_ms: None,
        }
    }

    pub fn allocation_timeout(&self) -> Option<Duration> {
        self.synapse_driver_allocation_timeout_ms
            .map(Duration::from_millis)
    }
}
