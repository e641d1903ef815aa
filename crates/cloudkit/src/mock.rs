//! Mock provisioner for testing.

use crate::error::{Error, Result};
use crate::{Instance, Provisioner};
use std::sync::{Arc, Mutex, PoisonError};

/// Provisioner that hands out a fixed address and records requests.
#[derive(Debug, Clone)]
pub struct MockProvisioner {
    address: String,
    fail: bool,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockProvisioner {
    /// Every provisioned instance gets `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            fail: false,
            requests: Arc::default(),
        }
    }

    /// A provisioner that rejects every machine type.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("")
        }
    }

    /// Machine types requested so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Provisioner for MockProvisioner {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn provision(&self, machine_type: &str) -> Result<Instance> {
        let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        requests.push(machine_type.to_string());
        if self.fail {
            return Err(Error::MachineTypeNotFound(machine_type.to_string()));
        }
        Ok(Instance {
            id: format!("mock-{}", requests.len()),
            address: self.address.clone(),
            machine_type: machine_type.to_string(),
            user: None,
        })
    }
}
