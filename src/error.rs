use std::fmt::{Debug, Display};

use nix::errno::Errno;
use thiserror::Error;

// A low error is raised deep in the interpreter where no source position is known.
// A high error is a low error that has been blamed on a line of input.
// The top level loop is the only place that prints either kind.

pub type RashResult<T> = Result<T, RashErr>;

#[derive(Debug)]
pub enum RashErr {
	Low(RashErrLow),
	High(RashErrHigh)
}

impl Display for RashErr {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			RashErr::Low(low) => write!(f,"{}",low),
			RashErr::High(high) => write!(f,"{}",high),
		}
	}
}

impl RashErr {
	pub fn low(&self) -> &RashErrLow {
		match self {
			RashErr::Low(low) => low,
			RashErr::High(high) => high.get_err()
		}
	}

	pub fn into_low(self) -> RashErrLow {
		match self {
			RashErr::Low(low) => low,
			RashErr::High(high) => high.low_err
		}
	}

	/// Attach a line number to an error that doesn't have one yet.
	pub fn blame(self, line: usize) -> Self {
		match self {
			RashErr::Low(low) if !low.is_control_flow() => RashErr::High(RashErrHigh::blame(line, low)),
			other => other
		}
	}

	pub fn line(&self) -> Option<usize> {
		match self {
			RashErr::Low(_) => None,
			RashErr::High(high) => Some(high.line)
		}
	}

	pub fn status(&self) -> i32 {
		self.low().status()
	}

	pub fn is_control_flow(&self) -> bool {
		self.low().is_control_flow()
	}

	pub fn is_syntax(&self) -> bool {
		matches!(self.low(), RashErrLow::Syntax(_))
	}

	pub fn is_fatal(&self) -> bool {
		matches!(self.low(), RashErrLow::Fatal(_))
	}

	pub fn class(&self) -> ErrClass {
		self.low().class()
	}

	pub fn syntax(msg: impl Into<String>) -> Self {
		RashErr::Low(RashErrLow::Syntax(msg.into()))
	}

	pub fn expansion(msg: impl Into<String>) -> Self {
		RashErr::Low(RashErrLow::Expansion(msg.into()))
	}

	pub fn exec(msg: impl Into<String>) -> Self {
		RashErr::Low(RashErrLow::ExecFailed(msg.into()))
	}

	pub fn usage(msg: impl Into<String>) -> Self {
		RashErr::Low(RashErrLow::Usage(msg.into()))
	}

	pub fn internal(msg: impl Into<String>) -> Self {
		RashErr::Low(RashErrLow::InternalErr(msg.into()))
	}
}

impl From<RashErrLow> for RashErr {
	fn from(value: RashErrLow) -> Self {
		RashErr::Low(value)
	}
}

impl From<std::io::Error> for RashErr {
	fn from(value: std::io::Error) -> Self {
		RashErr::Low(RashErrLow::IoError(value))
	}
}

impl From<Errno> for RashErr {
	fn from(value: Errno) -> Self {
		RashErr::Low(RashErrLow::ErrNo(value))
	}
}

/// Simple errors
#[derive(Debug,Error)]
pub enum RashErrLow {
	#[error("syntax error: {0}")]
	Syntax(String),
	#[error("{0}")]
	Expansion(String),
	#[error("{0}: not found")]
	CmdNotFound(String),
	#[error("{0}: Permission denied")]
	BadPermission(String),
	#[error("{0}: is read only")]
	ReadOnly(String),
	#[error("{0}: Bad file descriptor")]
	BadFD(String),
	#[error("{0}")]
	Redirect(String),
	#[error("{0}")]
	IoError(std::io::Error),
	#[error("{}", .0.desc())]
	ErrNo(Errno),
	#[error("{0}")]
	ExecFailed(String),
	/// Bad arguments to a builtin
	#[error("{0}")]
	Usage(String),
	#[error("internal error: {0}")]
	InternalErr(String),
	#[error("{0}")]
	Fatal(String),

	// Not actual errors, used to unwind the evaluator for `exit`, `return`, `break` and `continue`
	#[error("")]
	CleanExit(i32),
	#[error("")]
	FuncReturn(i32),
	#[error("")]
	LoopBreak(usize),
	#[error("")]
	LoopCont(usize),
	/// A SIGINT arrived while an interactive shell was busy
	#[error("")]
	Interrupted,
}

/// How the statement loop reacts to an error
#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum ErrClass {
	Syntax,
	Expansion,
	Execution,
	Fatal,
	ControlFlow
}

impl RashErrLow {
	pub fn from_io() -> Self {
		Self::IoError(std::io::Error::last_os_error())
	}

	pub fn class(&self) -> ErrClass {
		match self {
			RashErrLow::Syntax(_) => ErrClass::Syntax,
			RashErrLow::Expansion(_) => ErrClass::Expansion,
			RashErrLow::Fatal(_) => ErrClass::Fatal,
			_ if self.is_control_flow() => ErrClass::ControlFlow,
			_ => ErrClass::Execution
		}
	}

	pub fn is_control_flow(&self) -> bool {
		matches!(self,
			RashErrLow::CleanExit(_) |
			RashErrLow::FuncReturn(_) |
			RashErrLow::LoopBreak(_) |
			RashErrLow::LoopCont(_) |
			RashErrLow::Interrupted
		)
	}

	/// The exit status a command gets when it fails with this error
	pub fn status(&self) -> i32 {
		match self {
			RashErrLow::Syntax(_) |
			RashErrLow::Usage(_) => 2,
			RashErrLow::CmdNotFound(_) => 127,
			RashErrLow::BadPermission(_) => 126,
			RashErrLow::Fatal(_) => 2,
			RashErrLow::CleanExit(code) |
			RashErrLow::FuncReturn(code) => *code,
			RashErrLow::Interrupted => 130,
			_ => 1
		}
	}
}

#[derive(Debug)]
pub struct RashErrHigh {
	line: usize,
	low_err: RashErrLow
}

impl Display for RashErrHigh {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f,"{}: {}",self.line,self.low_err)
	}
}

impl RashErrHigh {
	pub fn blame(line: usize, low_err: RashErrLow) -> Self {
		Self { line, low_err }
	}

	pub fn syntax_err(msg: impl Into<String>, line: usize) -> Self {
		Self::blame(line, RashErrLow::Syntax(msg.into()))
	}

	pub fn get_err(&self) -> &RashErrLow {
		&self.low_err
	}

	pub fn line(&self) -> usize {
		self.line
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn statuses_follow_error_class() {
		assert_eq!(RashErr::syntax("x").status(), 2);
		assert_eq!(RashErr::Low(RashErrLow::CmdNotFound("foo".into())).status(), 127);
		assert_eq!(RashErr::Low(RashErrLow::BadPermission("foo".into())).status(), 126);
		assert_eq!(RashErr::expansion("x: parameter not set").status(), 1);
		assert_eq!(RashErr::Low(RashErrLow::FuncReturn(4)).status(), 4);
	}

	#[test]
	fn blame_attaches_line_once() {
		let err = RashErr::syntax("unexpected \"fi\"").blame(3).blame(9);
		assert_eq!(err.line(), Some(3));
		assert_eq!(err.to_string(), "3: syntax error: unexpected \"fi\"");
	}

	#[test]
	fn classes() {
		assert_eq!(RashErr::expansion("x").class(), ErrClass::Expansion);
		assert_eq!(RashErr::Low(RashErrLow::CmdNotFound("x".into())).class(), ErrClass::Execution);
		assert_eq!(RashErr::Low(RashErrLow::CleanExit(0)).class(), ErrClass::ControlFlow);
	}

	#[test]
	fn control_flow_is_never_blamed() {
		let err = RashErr::Low(RashErrLow::LoopBreak(1)).blame(2);
		assert!(err.line().is_none());
		assert!(err.is_control_flow());
	}
}
