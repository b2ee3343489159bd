//! Resolves a call's service and method to a registered handler.

use crate::error::{Error, Result};

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use grpc_web_handler::{CallMode, Handler};

/// A handler together with the mode its calls run in.
#[derive(Clone, Debug)]
pub struct Registration {
    handler: Arc<dyn Handler>,
    mode: CallMode,
}

impl Registration {
    /// The handler serving the call.
    #[must_use]
    pub fn handler(&self) -> Arc<dyn Handler> {
        self.handler.clone()
    }

    /// The call mode.
    #[must_use]
    pub const fn mode(&self) -> CallMode {
        self.mode
    }
}

/// Collects registrations at startup. Consumed by [`DispatcherBuilder::build`].
#[derive(Debug, Default)]
pub struct DispatcherBuilder {
    services: HashMap<String, Registration>,
    methods: HashMap<(String, String), Registration>,
}

impl DispatcherBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one method.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is empty or contains `/`, or if the method
    /// is already registered.
    pub fn register<H: Handler>(
        mut self,
        service: impl Into<String>,
        method: impl Into<String>,
        mode: CallMode,
        handler: H,
    ) -> Result<Self> {
        let service = validate_name(service.into())?;
        let method = validate_name(method.into())?;
        let registration = Registration {
            handler: Arc::new(handler),
            mode,
        };

        match self.methods.entry((service, method)) {
            Entry::Occupied(entry) => {
                let (service, method) = entry.key();
                Err(Error::DuplicateRegistration(format!("/{service}/{method}")))
            }
            Entry::Vacant(entry) => {
                entry.insert(registration);
                Ok(self)
            }
        }
    }

    /// Register a handler for every method of a service. Calls are treated
    /// as bidirectional streams, so no message counts are enforced.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or contains `/`, or if the
    /// service is already registered.
    pub fn register_service<H: Handler>(
        mut self,
        service: impl Into<String>,
        handler: H,
    ) -> Result<Self> {
        let service = validate_name(service.into())?;
        let registration = Registration {
            handler: Arc::new(handler),
            mode: CallMode::BidiStreaming,
        };

        match self.services.entry(service) {
            Entry::Occupied(entry) => Err(Error::DuplicateRegistration(format!(
                "service {}",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                entry.insert(registration);
                Ok(self)
            }
        }
    }

    /// Freeze the registrations.
    #[must_use]
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            services: self.services,
            methods: self.methods,
        }
    }
}

fn validate_name(name: String) -> Result<String> {
    if name.is_empty() || name.contains('/') || name.chars().any(char::is_whitespace) {
        return Err(Error::InvalidName(name));
    }

    Ok(name)
}

/// Read-only table of registrations, shared by every call.
#[derive(Debug, Default)]
pub struct Dispatcher {
    services: HashMap<String, Registration>,
    methods: HashMap<(String, String), Registration>,
}

impl Dispatcher {
    /// Start collecting registrations.
    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Find the handler for a call. Method registrations win over service
    /// registrations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if neither the method nor its service is
    /// registered.
    pub fn resolve(&self, service: &str, method: &str) -> Result<&Registration> {
        self.methods
            .get(&(service.to_string(), method.to_string()))
            .or_else(|| self.services.get(service))
            .ok_or_else(|| Error::NotFound {
                service: service.to_string(),
                method: method.to_string(),
            })
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len() + self.methods.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
