use std::sync::Arc;

use tevm_common::types::ChainConfig;
use tevm_storage::StateManager;

use crate::interpreter::{Interpreter, TransferInterpreter};

/// Chain rules, world state and the interpreter that runs code against it.
#[derive(Debug)]
pub struct Vm {
    pub state: StateManager,
    pub config: ChainConfig,
    interpreter: Arc<dyn Interpreter>,
}

impl Vm {
    pub fn new(config: ChainConfig, state: StateManager) -> Self {
        Self {
            state,
            config,
            interpreter: Arc::new(TransferInterpreter),
        }
    }

    pub fn with_interpreter(mut self, interpreter: Arc<dyn Interpreter>) -> Self {
        self.interpreter = interpreter;
        self
    }

    pub fn interpreter(&self) -> Arc<dyn Interpreter> {
        Arc::clone(&self.interpreter)
    }

    /// Independent VM over a deep copy of the state, for speculative work.
    pub fn deep_copy(&self) -> Self {
        Self {
            state: self.state.deep_copy(),
            config: self.config,
            interpreter: Arc::clone(&self.interpreter),
        }
    }
}
