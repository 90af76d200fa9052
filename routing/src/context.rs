use std::collections::HashSet;

/// Presence-only markers carried by a storage request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextFlag {
    /// The request was issued by the routing engine itself.
    RoutingOwnIo,
    /// Exempts the request from the proxy request filter.
    NotFilteringSubject,
    /// Set by the filter when it refused to contact the remote.
    FilterRejected,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    flags: HashSet<ContextFlag>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for file operations issued by the engine.
    pub fn own_io() -> Self {
        RequestContext::new().with(ContextFlag::RoutingOwnIo)
    }

    pub fn with(mut self, flag: ContextFlag) -> Self {
        self.flags.insert(flag);
        self
    }

    pub fn set(&mut self, flag: ContextFlag) {
        self.flags.insert(flag);
    }

    pub fn has(&self, flag: ContextFlag) -> bool {
        self.flags.contains(&flag)
    }
}

/// A request against a repository path, as seen by the proxy request filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRequest {
    pub path: String,
    pub context: RequestContext,
}

impl ResourceRequest {
    pub fn new(path: impl Into<String>) -> Self {
        ResourceRequest {
            path: path.into(),
            context: RequestContext::new(),
        }
    }

    pub fn with_flag(mut self, flag: ContextFlag) -> Self {
        self.context.set(flag);
        self
    }
}
