use log::{debug, trace};

use crate::builtin::BuiltinCmd;
use crate::execute::{fork_single, func, pipeline, redir, ExecFlags};
use crate::expand;
use crate::interp::parse::{NdType, Node, Redir};
use crate::shellenv::vars::VarFlags;
use crate::shopt::ShOpts;
use crate::utils::{exec_external, find_in_path, is_exec, write_err, PathLookup};
use crate::prelude::*;

/// Which kinds of command a name may resolve to
#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum Lookup {
	All,
	/// `command name`: functions are skipped
	NoFunctions
}

/// `set -x` output, written before the command runs
fn xtrace(rash: &Rash, vars: &[(String,String)], args: &[String]) {
	let ps4 = rash.get_var("PS4").unwrap_or("+ ");
	let mut words: Vec<String> = vars.iter()
		.map(|(name, value)| format!("{name}={}", value.sh_quote()))
		.collect();
	words.extend(args.iter().map(|arg| arg.sh_quote()));
	let _ = write_err(&format!("{ps4}{}\n", words.join(" ")));
}

pub fn exec_command(rash: &mut Rash, node: &Node, flags: ExecFlags) -> RashResult<()> {
	let NdType::Command { assigns, argv, redirs } = &node.nd_type else {
		return Err(RashErr::internal("exec_command called on a compound node"))
	};
	rash.meta_mut().cmdsub_status = None;
	let args = expand::expand_argv(rash, argv)?;
	if args.is_empty() {
		return assign_only(rash, assigns, redirs)
	}

	let mut vars = Vec::with_capacity(assigns.len());
	for word in assigns {
		vars.push(expand::expand_assignment(rash, word)?);
	}
	if rash.meta().has_opt(ShOpts::XTRACE) {
		xtrace(rash, &vars, &args);
	}
	run_args(rash, args, vars, redirs, flags, Lookup::All)
}

/// `a=1 b=$a >file` with no command word. Assignments happen in order and stick.
/// The status is that of the last command substitution, or zero.
fn assign_only(rash: &mut Rash, assigns: &[crate::interp::token::Word], redirs: &[Redir]) -> RashResult<()> {
	for word in assigns {
		let (name, value) = expand::expand_assignment(rash, word)?;
		if rash.meta().has_opt(ShOpts::XTRACE) {
			xtrace(rash, &[(name.clone(), value.clone())], &[]);
		}
		rash.set_var(&name, &value)?;
	}
	let status = rash.meta().cmdsub_status.unwrap_or(0);
	redir::with_redirs(rash, redirs, |rash| {
		rash.set_code(status);
		Ok(())
	})
}

/// Find an external command, consulting and updating the hash table
pub fn resolve_path(rash: &mut Rash, name: &str) -> RashResult<PathBuf> {
	if name.contains('/') {
		return Ok(crate::utils::to_path(name))
	}
	if let Some(path) = rash.logic().get_hashed(name) {
		if is_exec(path) {
			return Ok(path.to_path_buf())
		}
		debug!("hashed path for {name} went stale");
	}
	let path_var = rash.get_var("PATH").unwrap_or_default().to_string();
	match find_in_path(name, &path_var) {
		PathLookup::Found(path) => {
			rash.logic_mut().hash_cmd(name, path.clone());
			Ok(path)
		}
		PathLookup::NotExecutable(_) => Err(Low(RashErrLow::BadPermission(name.to_string()))),
		PathLookup::NotFound => Err(Low(RashErrLow::CmdNotFound(name.to_string())))
	}
}

/// Run an already expanded command line
pub fn run_args(
	rash: &mut Rash,
	args: Vec<String>,
	vars: Vec<(String,String)>,
	redirs: &[Redir],
	flags: ExecFlags,
	lookup: Lookup
) -> RashResult<()> {
	let name = args[0].as_str();
	if !name.contains('/') {
		if lookup == Lookup::All {
			if let Some(body) = rash.logic().get_func(name) {
				trace!("calling function {name}");
				return func::call_function(rash, body, &args, vars, redirs, flags)
			}
		}
		if let Some(builtin) = BuiltinCmd::lookup(name) {
			return run_builtin(rash, builtin, &args, vars, redirs)
		}
	}
	run_external(rash, args, vars, redirs, flags)
}

fn run_builtin(
	rash: &mut Rash,
	builtin: BuiltinCmd,
	args: &[String],
	vars: Vec<(String,String)>,
	redirs: &[Redir]
) -> RashResult<()> {
	if builtin == BuiltinCmd::Exec {
		return crate::builtin::exec::exec(rash, args, vars, redirs)
	}
	if builtin.is_special() {
		// Assignments in front of special builtins outlive the command
		for (name, value) in &vars {
			rash.set_var(name, value)?;
		}
		return redir::with_redirs(rash, redirs, |rash| builtin.run(rash, args))
	}
	if vars.is_empty() {
		return redir::with_redirs(rash, redirs, |rash| builtin.run(rash, args))
	}

	rash.vars_mut().push_local_frame();
	let result = (|| -> RashResult<()> {
		for (name, value) in &vars {
			rash.vars_mut().mark_local(name)?;
			rash.vars_mut().set_var_flags(name, Some(value), VarFlags::EXPORT)?;
		}
		redir::with_redirs(rash, redirs, |rash| builtin.run(rash, args))
	})();
	rash.vars_mut().pop_local_frame();
	result
}

fn run_external(
	rash: &mut Rash,
	args: Vec<String>,
	vars: Vec<(String,String)>,
	redirs: &[Redir],
	flags: ExecFlags
) -> RashResult<()> {
	let path = match resolve_path(rash, &args[0]) {
		Ok(path) => path,
		Err(e) => {
			// The message goes wherever this command's stderr was sent
			return redir::with_redirs(rash, redirs, move |rash| {
				rash.report_err(&e);
				rash.set_code(e.status());
				Ok(())
			})
		}
	};

	let text = args.join(" ");
	let launch = move |rash: &mut Rash| -> RashResult<()> {
		redir::apply_redirs(rash, redirs, false)?;
		for (name, value) in &vars {
			rash.vars_mut().export_var(name, value)?;
		}
		let envp = rash.vars().envp();
		let shell_name = rash.shell_name().to_string();
		exec_external(&path, &args, envp, &shell_name, &rash.blame())
	};

	let has_exit_trap = rash.meta().traps.get(0).is_some();
	if flags.contains(ExecFlags::EXIT) && !has_exit_trap {
		trace!("exec in place");
		return launch(rash)
	}

	let job = fork_single(rash, &text, false, launch)?;
	pipeline::handle_fg(rash, job)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::interpret::eval_string;

	#[test]
	fn assignment_only_status_comes_from_substitution() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "x=$(exit 4)").unwrap();
		assert_eq!(rash.get_status(), 4);
		eval_string(&mut rash, "false; y=plain").unwrap();
		assert_eq!(rash.get_status(), 0);
	}

	#[test]
	fn assignments_apply_left_to_right() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "a=1 b=$a").unwrap();
		assert_eq!(rash.get_var("b"), Some("1"));
	}

	#[test]
	fn prefix_assignments_on_regular_builtins_are_temporary() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "v=outer; v=inner true").unwrap();
		assert_eq!(rash.get_var("v"), Some("outer"));
		eval_string(&mut rash, "v=kept :").unwrap();
		assert_eq!(rash.get_var("v"), Some("kept"));
	}

	#[test]
	fn missing_commands_are_127() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "definitely-not-a-command-xyz 2>/dev/null").unwrap();
		assert_eq!(rash.get_status(), 127);
		let err = resolve_path(&mut rash, "definitely-not-a-command-xyz").unwrap_err();
		assert_eq!(err.to_string(), "definitely-not-a-command-xyz: not found");
	}

	#[test]
	fn found_commands_are_hashed() {
		let mut rash = Rash::new();
		rash.set_var("PATH", "/bin:/usr/bin").unwrap();
		let path = resolve_path(&mut rash, "sh").unwrap();
		assert!(path.ends_with("sh"));
		assert!(rash.logic().get_hashed("sh").is_some());
	}
}
