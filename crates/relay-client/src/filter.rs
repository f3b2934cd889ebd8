//! Client-side filter chain.
//!
//! The proxy runs registered filters at four points around each call.
//! A rejecting filter is expected to record its reason in the context
//! status.

use std::sync::Arc;

use crate::context::ClientContext;

/// Where in the call lifecycle a filter runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPoint {
    PreRpcInvoke,
    PostRpcInvoke,
    PreSendMsg,
    PostRecvMsg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    Continue,
    Reject,
}

pub trait Filter: Send + Sync {
    fn run(&self, point: FilterPoint, ctx: &mut ClientContext) -> FilterStatus;
}

/// An ordered set of filters; the first rejection wins.
#[derive(Default, Clone)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, filter: Arc<dyn Filter>) {
        self.filters.push(filter);
    }

    pub fn run(&self, point: FilterPoint, ctx: &mut ClientContext) -> FilterStatus {
        for filter in &self.filters {
            if filter.run(point, ctx) == FilterStatus::Reject {
                return FilterStatus::Reject;
            }
        }
        FilterStatus::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Status;

    struct RejectAt(FilterPoint);

    impl Filter for RejectAt {
        fn run(&self, point: FilterPoint, ctx: &mut ClientContext) -> FilterStatus {
            if point == self.0 {
                ctx.set_status(Status::error(1, "rejected by filter"));
                FilterStatus::Reject
            } else {
                FilterStatus::Continue
            }
        }
    }

    #[test]
    fn first_rejection_stops_the_chain() {
        let mut chain = FilterChain::new();
        chain.add(Arc::new(RejectAt(FilterPoint::PreRpcInvoke)));

        let mut ctx = ClientContext::new();
        assert_eq!(
            chain.run(FilterPoint::PreRpcInvoke, &mut ctx),
            FilterStatus::Reject
        );
        assert!(!ctx.status().is_ok());

        ctx.reset_status();
        assert_eq!(
            chain.run(FilterPoint::PostRpcInvoke, &mut ctx),
            FilterStatus::Continue
        );
        assert!(ctx.status().is_ok());
    }
}
