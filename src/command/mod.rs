pub mod executor;
pub mod parser;
pub mod tokenize;

pub use executor::{
    AlwaysDeny, AutoApprove, Confirmation, Confirmer, ExecError, ExecOptions, ExecutionResult,
    Executor, TerminalPrompt,
};
pub use parser::{CommandInput, CommandParser, CommandSyntaxError, Invocation, ParsedCommand, Platform};
