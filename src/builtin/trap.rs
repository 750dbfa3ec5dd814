use log::debug;

use crate::signal::{sig_from_name, sig_name, TrapAction};
use crate::utils::write_out;
use crate::prelude::*;

fn list_traps(rash: &Rash) -> RashResult<()> {
	let mut out = String::new();
	for (sig, action) in rash.meta().traps.sorted() {
		let cmd = match action {
			TrapAction::Ignore => "",
			TrapAction::Command(cmd) => cmd.as_str()
		};
		out.push_str(&format!("trap -- {} {}\n", cmd.sh_quote(), sig_name(sig)));
	}
	write_out(&out)?;
	Ok(())
}

/// `trap [action] condition...`
///
/// A lone condition, or a numeric first operand, resets the listed conditions.
/// An action of `-` also resets, and an empty action ignores the signal.
pub fn execute(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let mut args = &argv[1..];
	if args.first().is_some_and(|arg| arg == "--") {
		args = &args[1..];
	}
	if args.is_empty() {
		list_traps(rash)?;
		rash.set_code(0);
		return Ok(())
	}

	let action = if args.len() == 1 || args[0].is_digits() {
		None
	} else {
		let action = &args[0];
		args = &args[1..];
		match action.as_str() {
			"-" => None,
			"" => Some(TrapAction::Ignore),
			cmd => Some(TrapAction::Command(cmd.to_string()))
		}
	};

	let mode = rash.meta().sig_mode();
	let mut status = 0;
	for cond in args {
		let Some(sig) = sig_from_name(cond) else {
			rash.report(&format!("trap: {cond}: bad trap"));
			status = 1;
			continue
		};
		debug!("trap for {} set to {action:?}", sig_name(sig));
		rash.meta_mut().traps.set(sig, action.clone(), mode);
	}
	rash.set_code(status);
	Ok(())
}

#[cfg(test)]
mod tests {
	use crate::interpret::eval_string;
	use crate::signal::TrapAction;
	use crate::prelude::*;

	#[test]
	fn set_ignore_and_reset() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "trap 'echo bye' EXIT; trap '' USR2").unwrap();
		assert_eq!(rash.meta().traps.get(0), Some(&TrapAction::Command("echo bye".into())));
		assert_eq!(rash.meta().traps.get(libc::SIGUSR2), Some(&TrapAction::Ignore));
		eval_string(&mut rash, "trap - EXIT; trap USR2").unwrap();
		assert_eq!(rash.meta().traps.get(0), None);
		assert_eq!(rash.meta().traps.get(libc::SIGUSR2), None);
	}

	#[test]
	fn bad_condition() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "trap 'x=1' NOTASIGNAL 2>/dev/null").unwrap();
		assert_eq!(rash.get_status(), 1);
	}
}
