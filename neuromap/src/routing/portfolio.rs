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

use std::time::Duration;

use log::Level;

use crate::network::Network;
use crate::observe::{log_observer, Event, SharedObserver};
use crate::routing::{GreedyRouter, Router, RoutingOptions};
use crate::routing::result::RoutingResult;
use crate::Error;

/// Tries its routers in order and returns the first result. Only
/// `UnsuccessfulRouting` moves on to the next router, any other error is
/// returned right away.
pub struct PortfolioRouter {
    routers: Vec<Box<dyn Router>>,
    observer: SharedObserver,
}

/// Time budget of the backtracking fallback in the default portfolio, both
/// for a single bus allocation and for exploring label assignments.
pub const DEFAULT_BACKTRACKING_BUDGET: Duration = Duration::from_secs(10);

fn default_backtracking_options() -> RoutingOptions {
    RoutingOptions {
        synapse_driver_allocation_timeout_ms: Some(DEFAULT_BACKTRACKING_BUDGET.as_millis() as u64),
        ..RoutingOptions::backtracking(Some(DEFAULT_BACKTRACKING_BUDGET))
    }
}

impl Default for PortfolioRouter {
    /// Greedy allocation first, then backtracking within
    /// `DEFAULT_BACKTRACKING_BUDGET`.
    fn default() -> Self {
        Self::new(vec![
            Box::new(GreedyRouter::default()),
            Box::new(GreedyRouter::new(default_backtracking_options())),
        ])
    }
}

impl PortfolioRouter {
    pub fn new(routers: Vec<Box<dyn Router>>) -> Self {
        Self::with_observer(routers, log_observer())
    }

    pub fn with_observer(routers: Vec<Box<dyn Router>>, observer: SharedObserver) -> Self {
        Self { routers, observer }
    }
}

impl Router for PortfolioRouter {
    fn name(&self) -> String {
        let names = self.routers.iter().map(|r| r.name()).collect::<Vec<_>>();
        format!("PortfolioRouter[{}]", names.join(", "))
    }

    fn route(&mut self, network: &Network) -> Result<RoutingResult, Error> {
        let mut last = Error::UnsuccessfulRouting(String::from("no routers in portfolio"));
        for router in self.routers.iter_mut() {
            match router.route(network) {
                Ok(result) => {
                    self.observer.observe(Event::new(
                        Level::Debug,
                        "routing",
                        format!("{} succeeded", router.name()),
                    ));
                    return Ok(result);
                }
                Err(Error::UnsuccessfulRouting(message)) => {
                    self.observer.observe(Event::new(
                        Level::Debug,
                        "routing",
                        format!("{} unsuccessful, trying next: {}", router.name(), message),
                    ));
                    last = Error::UnsuccessfulRouting(message);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::{AtomicNeuron, Hemisphere};
    use crate::routing::AllocationPolicy;
    use crate::network::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Failing {
        error: fn() -> Error,
        calls: Arc<AtomicUsize>,
    }

    impl Router for Failing {
        fn name(&self) -> String {
            String::from("Failing")
        }

        fn route(&mut self, _network: &Network) -> Result<RoutingResult, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err((self.error)())
        }
    }

    fn network() -> Arc<Network> {
        let mut builder = NetworkBuilder::new();
        let external = builder.add(ExternalSourcePopulation::new(1)).unwrap();
        let internal = builder
            .add(Population::from_atomic_neurons(
                &[AtomicNeuron::new(Hemisphere::BOTTOM, 5)],
                &[Receptor::excitatory()],
                false,
            ))
            .unwrap();
        builder
            .add(Projection::one_to_one(Receptor::excitatory(), &[20], external, internal))
            .unwrap();
        builder.done()
    }

    #[test]
    fn falls_through_unsuccessful() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut portfolio = PortfolioRouter::new(vec![
            Box::new(Failing {
                error: || Error::UnsuccessfulRouting(String::from("test")),
                calls: calls.clone(),
            }),
            Box::new(GreedyRouter::default()),
        ]);
        let result = portfolio.route(&network()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.execution_instances.len(), 1);
    }

    #[test]
    fn stops_on_other_errors() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let calls = Arc::new(AtomicUsize::new(0));
        let failing = |error: fn() -> Error| -> Box<dyn Router> {
            Box::new(Failing {
                error,
                calls: calls.clone(),
            })
        };
        let mut portfolio = PortfolioRouter::new(vec![
            failing(|| Error::CapacityExceeded(String::from("test"))),
            failing(|| Error::UnsuccessfulRouting(String::from("test"))),
        ]);
        assert_eq!(
            portfolio.route(&network()),
            Err(Error::CapacityExceeded(String::from("test")))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut portfolio = PortfolioRouter::new(vec![
            failing(|| Error::UnsuccessfulRouting(String::from("first"))),
            failing(|| Error::UnsuccessfulRouting(String::from("second"))),
        ]);
        assert_eq!(
            portfolio.route(&network()),
            Err(Error::UnsuccessfulRouting(String::from("second")))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn default_portfolio() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let mut portfolio = PortfolioRouter::default();
        assert!(portfolio.name().starts_with("PortfolioRouter[GreedyRouter"));
        assert!(portfolio.route(&network()).is_ok());
        assert!(matches!(
            PortfolioRouter::new(vec![]).route(&network()),
            Err(Error::UnsuccessfulRouting(_))
        ));
    }

    #[test]
    fn default_backtracking_is_bounded() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let options = default_backtracking_options();
        assert_eq!(
            options.synapse_driver_allocation_policy,
            AllocationPolicy::Backtracking {
                max_duration_ms: Some(10_000)
            }
        );
        assert_eq!(options.allocation_timeout(), Some(DEFAULT_BACKTRACKING_BUDGET));
    }
}
