mod block_builder;
mod errors;
mod interpreter;
mod receipts;
mod run_block;
mod run_tx;
mod vm;

pub use block_builder::{
    AddTxOpts, BlockBuilder, BuildBlockOpts, BuildStatus, HeaderData, SealOpts, build_block,
};
pub use errors::{BuilderError, ExceptionError, InvalidBlockError, TxValidationError, VmError};
pub use interpreter::{
    BlockEnv, ExecResult, ExecutionContext, Interpreter, TransferInterpreter, create_address,
};
pub use receipts::generate_tx_receipt;
pub use run_block::{
    RunBlockOpts, RunBlockResult, calculate_miner_reward, calculate_ommer_reward, reward_account,
    run_block,
};
pub use run_tx::{DEFAULT_BLOCK_GAS_LIMIT, RunTxOpts, RunTxResult, run_tx};
pub use vm::Vm;
