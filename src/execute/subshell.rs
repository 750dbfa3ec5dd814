use crate::execute::{eval_node, fork_single, pipeline, redir, ExecFlags};
use crate::interp::parse::{Node, Redir};
use crate::prelude::*;

/// `( list )`. Runs in a child so nothing it changes gets back to this shell.
/// When this process is already a throwaway child, the fork is skipped.
pub fn exec_subshell(rash: &mut Rash, body: &Node, redirs: &[Redir], flags: ExecFlags) -> RashResult<()> {
	let run = |rash: &mut Rash| -> RashResult<()> {
		redir::apply_redirs(rash, redirs, false)?;
		eval_node(rash, body, ExecFlags::EXIT)
	};

	if flags.contains(ExecFlags::EXIT) && rash.meta().traps.get(0).is_none() {
		rash.enter_subshell();
		return run(rash)
	}

	let text = format!("({body})");
	let job = fork_single(rash, &text, false, run)?;
	pipeline::handle_fg(rash, job)
}

#[cfg(test)]
mod tests {
	use crate::interpret::eval_string;
	use crate::prelude::*;

	#[test]
	fn changes_do_not_escape() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "x=1; (x=2; cd /; exit 5)").unwrap();
		assert_eq!(rash.get_var("x"), Some("1"));
		assert_eq!(rash.get_status(), 5);
	}
}
