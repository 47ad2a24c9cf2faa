use std::sync::{Arc, Mutex, PoisonError};

use crate::controller::{BootstrapController, ControllerSettings};
use crate::error::BootstrapError;

/// Owns the process's bootstrap controller and hands out shared handles to it.
#[derive(Default)]
pub struct BootstrapContext {
    controller: Mutex<Option<Arc<BootstrapController>>>,
}

impl BootstrapContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the controller. Fails while one already exists.
    pub fn open(
        &self,
        settings: ControllerSettings,
    ) -> Result<Arc<BootstrapController>, BootstrapError> {
        let mut slot = self.controller.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(BootstrapError::Precondition(
                "a bootstrap controller already exists".to_string(),
            ));
        }
        let controller = Arc::new(BootstrapController::new(settings)?);
        *slot = Some(Arc::clone(&controller));
        Ok(controller)
    }

    pub fn controller(&self) -> Option<Arc<BootstrapController>> {
        self.controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Releases the context's handle. The controller shuts down once the last handle drops.
    pub fn close(&self) -> Option<Arc<BootstrapController>> {
        self.controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
