//! Declarative topology DSL.
//!
//! A [`Topology`] is pure data: an immutable tree describing the shape of
//! a pipeline before anything runs. Leaves are always single workers
//! ([`element`]); [`chain`] and [`fan_in`] nest freely.
//!
//! ```text
//!   chain([ element(a), fan_in([ element(b), chain([element(c), element(d)]) ]) ])
//!
//!          ┌───┐        ┌───┐
//!   in ───▶│ a │───┬───▶│ b │───┐
//!          └───┘   │    └───┘   │
//!                  │    ┌───┐   │   ┌───┐
//!                  └───▶│ c │───┼──▶│agg│───▶ out
//!                       └───┘   │   └───┘
//!                        ┌───┐  │
//!                        │ d │──┘
//!                        └───┘
//! ```
//!
//! (`d` is fed by `c`; both `b` and `d` are terminal branches, so the
//! topology above has a terminal-branch count of 2.)
//!
//! Shape validation happens in [`create`](crate::create); the
//! constructors themselves never fail.
//!
//! # Examples
//!
//! ```rust
//! use chainflow_core::{chain, element, fan_in, Options};
//!
//! let forward = || element(
//!     |mut ctx| Box::pin(async move {
//!         while let Some(msg) = ctx.get().await {
//!             ctx.send(msg);
//!         }
//!         Ok(())
//!     }),
//!     Options::new(),
//! );
//!
//! let topology = chain(vec![
//!     forward(),
//!     fan_in(vec![forward(), forward()]),
//! ]);
//! assert_eq!(topology.terminal_count(), 2);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::{ChainError, Result};
use crate::options::Options;
use crate::worker::{WorkerContext, WorkerFn, WorkerFuture};

/// Declarative description of a pipeline's shape.
#[derive(Clone)]
pub enum Topology {
    /// A single worker: a start function plus its options bag.
    Element { fun: WorkerFn, options: Options },
    /// Parallel sub-topologies fanning into a common successor.
    FanIn(Vec<Topology>),
    /// An ordered sequence of sub-topologies, each feeding the next.
    Chain(Vec<Topology>),
}

/// A single worker running `fun` with the given options bag.
pub fn element<F>(fun: F, options: Options) -> Topology
where
    F: Fn(WorkerContext) -> WorkerFuture + Send + Sync + 'static,
{
    Topology::Element {
        fun: Arc::new(fun),
        options,
    }
}

/// Parallel sub-topologies whose terminal branches share one successor.
pub fn fan_in(children: Vec<Topology>) -> Topology {
    Topology::FanIn(children)
}

/// An ordered pipeline of sub-topologies.
pub fn chain(children: Vec<Topology>) -> Topology {
    Topology::Chain(children)
}

impl Topology {
    /// Number of terminal branches: the workers that will link directly
    /// into the aggregator.
    ///
    /// An element counts one; a chain counts whatever its last child
    /// counts; a fan-in counts the sum of its children.
    pub fn terminal_count(&self) -> usize {
        match self {
            Self::Element { .. } => 1,
            Self::Chain(children) => children.last().map_or(0, Self::terminal_count),
            Self::FanIn(children) => children.iter().map(Self::terminal_count).sum(),
        }
    }

    /// Reject structurally invalid shapes.
    ///
    /// An empty `chain` or an empty `fan_in` has no defined terminal
    /// branch, so construction refuses it up front.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Element { .. } => Ok(()),
            Self::Chain(children) => {
                if children.is_empty() {
                    return Err(ChainError::topology("a chain requires at least one stage"));
                }
                children.iter().try_for_each(Self::validate)
            }
            Self::FanIn(children) => {
                if children.is_empty() {
                    return Err(ChainError::topology("a fan-in requires at least one branch"));
                }
                children.iter().try_for_each(Self::validate)
            }
        }
    }
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Element { options, .. } => f
                .debug_struct("Element")
                .field("options", options)
                .finish_non_exhaustive(),
            Self::FanIn(children) => f.debug_tuple("FanIn").field(children).finish(),
            Self::Chain(children) => f.debug_tuple("Chain").field(children).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaf() -> Topology {
        element(|_ctx| Box::pin(async { Ok(()) }), Options::new())
    }

    #[test]
    fn element_counts_one() {
        assert_eq!(leaf().terminal_count(), 1);
    }

    #[test]
    fn chain_counts_its_last_child() {
        let topology = chain(vec![fan_in(vec![leaf(), leaf()]), leaf()]);
        assert_eq!(topology.terminal_count(), 1);

        let topology = chain(vec![leaf(), fan_in(vec![leaf(), leaf()])]);
        assert_eq!(topology.terminal_count(), 2);
    }

    #[test]
    fn fan_in_counts_the_sum_of_children() {
        let topology = fan_in(vec![
            leaf(),
            chain(vec![leaf(), fan_in(vec![leaf(), leaf(), leaf()])]),
        ]);
        assert_eq!(topology.terminal_count(), 4);
    }

    #[test]
    fn empty_shapes_are_rejected() {
        assert!(matches!(
            chain(vec![]).validate(),
            Err(ChainError::Topology(_))
        ));
        assert!(matches!(
            fan_in(vec![]).validate(),
            Err(ChainError::Topology(_))
        ));
        assert!(matches!(
            chain(vec![leaf(), fan_in(vec![])]).validate(),
            Err(ChainError::Topology(_))
        ));
    }

    fn topology_strategy() -> impl Strategy<Value = Topology> {
        let leaves = any::<u8>().prop_map(|_| leaf());
        leaves.prop_recursive(4, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 1..4).prop_map(chain),
                prop::collection::vec(inner, 1..4).prop_map(fan_in),
            ]
        })
    }

    proptest! {
        #[test]
        fn terminal_count_is_positive_and_structural(topology in topology_strategy()) {
            prop_assert!(topology.validate().is_ok());
            let count = topology.terminal_count();
            prop_assert!(count >= 1);
            match &topology {
                Topology::Element { .. } => prop_assert_eq!(count, 1),
                Topology::Chain(children) => {
                    prop_assert_eq!(count, children.last().map_or(0, Topology::terminal_count));
                }
                Topology::FanIn(children) => {
                    let sum: usize = children.iter().map(Topology::terminal_count).sum();
                    prop_assert_eq!(count, sum);
                }
            }
        }
    }
}
