use log::trace;

use crate::execute::{command, pipeline, redir, subshell, ExecFlags};
use crate::expand::{self, glob};
use crate::interp::parse::{CaseArm, NdType, Node};
use crate::interp::token::Word;
use crate::shopt::ShOpts;
use crate::signal;
use crate::prelude::*;

/// Where a loop goes after one of its lists finishes
enum LoopFlow {
	Normal,
	Break,
	Continue
}

/// Consume a `break`/`continue` aimed at this loop. One aimed further out
/// is passed on with its count reduced by one.
fn loop_flow(result: RashResult<()>) -> RashResult<LoopFlow> {
	let Err(e) = result else {
		return Ok(LoopFlow::Normal)
	};
	match e.low() {
		RashErrLow::LoopBreak(n) if *n > 1 => Err(Low(RashErrLow::LoopBreak(n - 1))),
		RashErrLow::LoopBreak(_) => Ok(LoopFlow::Break),
		RashErrLow::LoopCont(n) if *n > 1 => Err(Low(RashErrLow::LoopCont(n - 1))),
		RashErrLow::LoopCont(_) => Ok(LoopFlow::Continue),
		_ => Err(e)
	}
}

/// Flags for a node that is followed by more work in this process
fn not_last(flags: ExecFlags) -> ExecFlags {
	flags.difference(ExecFlags::EXIT)
}

fn tested(flags: ExecFlags) -> ExecFlags {
	not_last(flags) | ExecFlags::TESTED
}

pub fn eval_node(rash: &mut Rash, node: &Node, flags: ExecFlags) -> RashResult<()> {
	rash.meta_mut().cur_line = node.line;
	match &node.nd_type {
		NdType::Command { .. } => {
			command::exec_command(rash, node, flags)?;
			signal::run_pending_traps(rash)?;
		}
		NdType::Pipeline { cmds } => pipeline::exec_pipeline(rash, cmds, flags)?,
		NdType::Not { body } => {
			eval_node(rash, body, tested(flags))?;
			let code = if rash.get_status() == 0 { 1 } else { 0 };
			rash.set_code(code);
		}
		NdType::And { left, right } => {
			eval_node(rash, left, tested(flags))?;
			if rash.get_status() == 0 {
				eval_node(rash, right, flags)?;
			}
		}
		NdType::Or { left, right } => {
			eval_node(rash, left, tested(flags))?;
			if rash.get_status() != 0 {
				eval_node(rash, right, flags)?;
			}
		}
		NdType::List { left, right } => {
			eval_node(rash, left, not_last(flags))?;
			eval_node(rash, right, flags)?;
		}
		NdType::Background { body } => pipeline::exec_background(rash, body)?,
		NdType::If { cond, then_body, else_body } => {
			eval_node(rash, cond, tested(flags))?;
			if rash.get_status() == 0 {
				eval_node(rash, then_body, flags)?;
			} else if let Some(else_body) = else_body {
				eval_node(rash, else_body, flags)?;
			} else {
				rash.set_code(0);
			}
		}
		NdType::While { cond, body } => eval_loop(rash, cond, body, false, flags)?,
		NdType::Until { cond, body } => eval_loop(rash, cond, body, true, flags)?,
		NdType::For { var, items, body } => eval_for(rash, var, items.as_deref(), body, flags)?,
		NdType::Case { subject, arms } => eval_case(rash, subject, arms, flags)?,
		NdType::Subshell { body, redirs } => subshell::exec_subshell(rash, body, redirs, flags)?,
		NdType::Brace { body } => eval_node(rash, body, flags)?,
		NdType::Redirected { body, redirs } => {
			let inner = not_last(flags);
			redir::with_redirs(rash, redirs, |rash| eval_node(rash, body, inner))?;
		}
		NdType::FuncDef { name, body } => {
			trace!("defining function {name}");
			rash.logic_mut().set_func(name, body.clone());
			rash.set_code(0);
		}
	}

	let status = rash.get_status();
	if status != 0
	&& node.is_simple()
	&& !flags.contains(ExecFlags::TESTED)
	&& rash.meta().has_opt(ShOpts::ERREXIT) {
		trace!("errexit on status {status}");
		return Err(Low(RashErrLow::CleanExit(status)))
	}
	Ok(())
}

fn eval_loop(rash: &mut Rash, cond: &Node, body: &Node, until: bool, flags: ExecFlags) -> RashResult<()> {
	let body_flags = not_last(flags);
	rash.meta_mut().loop_depth += 1;
	let result = (|| -> RashResult<()> {
		let mut status = 0;
		loop {
			match loop_flow(eval_node(rash, cond, tested(flags)))? {
				LoopFlow::Break => break,
				LoopFlow::Continue => continue,
				LoopFlow::Normal => {}
			}
			if (rash.get_status() == 0) == until {
				break
			}
			let flow = loop_flow(eval_node(rash, body, body_flags))?;
			status = rash.get_status();
			if let LoopFlow::Break = flow {
				break
			}
		}
		rash.set_code(status);
		Ok(())
	})();
	rash.meta_mut().loop_depth -= 1;
	result
}

fn eval_for(rash: &mut Rash, var: &str, items: Option<&[Word]>, body: &Node, flags: ExecFlags) -> RashResult<()> {
	let items = match items {
		Some(words) => expand::expand_argv(rash, words)?,
		None => rash.vars().params().to_vec()
	};
	let body_flags = not_last(flags);
	rash.meta_mut().loop_depth += 1;
	let result = (|| -> RashResult<()> {
		let mut status = 0;
		for item in items {
			rash.set_var(var, &item)?;
			let flow = loop_flow(eval_node(rash, body, body_flags))?;
			status = rash.get_status();
			if let LoopFlow::Break = flow {
				break
			}
		}
		rash.set_code(status);
		Ok(())
	})();
	rash.meta_mut().loop_depth -= 1;
	result
}

fn eval_case(rash: &mut Rash, subject: &Word, arms: &[CaseArm], flags: ExecFlags) -> RashResult<()> {
	let subject = expand::expand_word_to_string(rash, subject)?;
	for arm in arms {
		for pattern in &arm.patterns {
			let pattern = expand::expand_pattern(rash, pattern)?;
			if glob::pattern_match(&pattern, &subject) {
				trace!("case {subject} matched {pattern}");
				match &arm.body {
					Some(body) => eval_node(rash, body, flags)?,
					None => rash.set_code(0)
				}
				return Ok(())
			}
		}
	}
	rash.set_code(0);
	Ok(())
}
