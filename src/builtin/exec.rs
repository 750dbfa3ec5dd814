use crate::builtin::{take_opts, BuiltinCmd};
use crate::execute::command::{resolve_path, run_args, Lookup};
use crate::execute::{redir, ExecFlags};
use crate::interp::parse::Redir;
use crate::interp::token::KEYWORDS;
use crate::utils::{exec_external, find_in_path, is_exec, write_err, write_out, PathLookup};
use crate::prelude::*;

/// A special builtin failing in a script ends the script
fn fail(rash: &mut Rash, err: RashErr, status: i32) -> RashResult<()> {
	rash.report(&format!("exec: {}", err.low()));
	rash.set_code(status);
	if !rash.meta().is_interactive() {
		return Err(Low(RashErrLow::CleanExit(status)))
	}
	Ok(())
}

/// `exec [cmd [args...]]`. Without a command the redirections stay in effect
/// for the rest of the shell's life.
pub fn exec(rash: &mut Rash, argv: &[String], vars: Vec<(String,String)>, redirs: &[Redir]) -> RashResult<()> {
	if argv.len() < 2 {
		if let Err(e) = redir::apply_redirs(rash, redirs, false) {
			return fail(rash, e, 1)
		}
		for (name, value) in &vars {
			rash.set_var(name, value)?;
		}
		rash.set_code(0);
		return Ok(())
	}

	let path = match resolve_path(rash, &argv[1]) {
		Ok(path) => path,
		Err(e) => {
			let status = e.status();
			return fail(rash, e, status)
		}
	};
	if let Err(e) = redir::apply_redirs(rash, redirs, false) {
		return fail(rash, e, 1)
	}
	for (name, value) in &vars {
		rash.vars_mut().export_var(name, value)?;
	}
	let envp = rash.vars().envp();
	let shell_name = rash.shell_name().to_string();
	crate::prompt::save_history(rash);
	exec_external(&path, &argv[1..], envp, &shell_name, &rash.blame())
}

/// How `type` and `command -v/-V` describe a name. `None` when it is nothing.
fn describe(rash: &Rash, name: &str, verbose: bool) -> Option<String> {
	if KEYWORDS.contains(&name) {
		return Some(if verbose { format!("{name} is a shell keyword") } else { name.to_string() })
	}
	if let Some(value) = rash.logic().get_alias(name) {
		return Some(if verbose {
			format!("{name} is an alias for {value}")
		} else {
			format!("alias {name}={}", value.sh_quote())
		})
	}
	if rash.logic().get_func(name).is_some() {
		return Some(if verbose { format!("{name} is a shell function") } else { name.to_string() })
	}
	if let Some(builtin) = BuiltinCmd::lookup(name) {
		let kind = if builtin.is_special() { "a special shell builtin" } else { "a shell builtin" };
		return Some(if verbose { format!("{name} is {kind}") } else { name.to_string() })
	}
	if name.contains('/') {
		return is_exec(Path::new(name))
			.then(|| if verbose { format!("{name} is {name}") } else { name.to_string() })
	}
	if let Some(path) = rash.logic().get_hashed(name) {
		let path = path.display();
		return Some(if verbose { format!("{name} is a tracked alias for {path}") } else { path.to_string() })
	}
	match find_in_path(name, rash.get_var("PATH").unwrap_or_default()) {
		PathLookup::Found(path) => {
			let path = path.display();
			Some(if verbose { format!("{name} is {path}") } else { path.to_string() })
		}
		_ => None
	}
}

fn describe_all(rash: &mut Rash, names: &[String], verbose: bool) -> RashResult<()> {
	let mut status = 0;
	for name in names {
		match describe(rash, name, verbose) {
			Some(line) => write_out(&format!("{line}\n"))?,
			None => {
				if verbose {
					write_err(&format!("{name}: not found\n"))?;
				}
				status = 127;
			}
		}
	}
	rash.set_code(status);
	Ok(())
}

/// `command [-v|-V] name [args...]`. Runs `name` without looking at functions.
pub fn command(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let (opts, rest) = take_opts(&argv[1..], "vV")?;
	if rest.is_empty() {
		rash.set_code(0);
		return Ok(())
	}
	if opts.contains(&'V') {
		return describe_all(rash, rest, true)
	}
	if opts.contains(&'v') {
		return describe_all(rash, rest, false)
	}
	run_args(rash, rest.to_vec(), vec![], &[], ExecFlags::empty(), Lookup::NoFunctions)
}

/// `type name...`
pub fn type_cmd(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	describe_all(rash, &argv[1..], true)
}

/// `hash [-r] [name...]`
pub fn hash(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let (opts, names) = take_opts(&argv[1..], "r")?;
	if opts.contains(&'r') {
		rash.logic_mut().clear_hash();
	}
	if names.is_empty() {
		if !opts.contains(&'r') {
			let mut out = String::new();
			for path in rash.logic().hashed().values() {
				out.push_str(&format!("{}\n", path.display()));
			}
			write_out(&out)?;
		}
		rash.set_code(0);
		return Ok(())
	}
	let mut status = 0;
	for name in names {
		if name.contains('/') || BuiltinCmd::lookup(name).is_some() || rash.logic().get_func(name).is_some() {
			continue
		}
		rash.logic_mut().unhash(name);
		if let Err(e) = resolve_path(rash, name) {
			rash.report(&format!("hash: {}", e.low()));
			status = 1;
		}
	}
	rash.set_code(status);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn descriptions() {
		let mut rash = Rash::new();
		rash.logic_mut().set_alias("ll", "ls -l");
		assert_eq!(describe(&rash, "if", true).unwrap(), "if is a shell keyword");
		assert_eq!(describe(&rash, "ll", false).unwrap(), "alias ll='ls -l'");
		assert_eq!(describe(&rash, "cd", true).unwrap(), "cd is a shell builtin");
		assert_eq!(describe(&rash, "export", true).unwrap(), "export is a special shell builtin");
		assert_eq!(describe(&rash, "no-such-thing-here", true), None);
		rash.logic_mut().hash_cmd("sh", PathBuf::from("/bin/sh"));
		assert_eq!(describe(&rash, "sh", true).unwrap(), "sh is a tracked alias for /bin/sh");
	}

	#[test]
	fn command_skips_functions() {
		let mut rash = Rash::new();
		crate::interpret::eval_string(&mut rash, "true() { return 5; }; true; a=$?; command true; b=$?").unwrap();
		assert_eq!(rash.get_var("a"), Some("5"));
		assert_eq!(rash.get_var("b"), Some("0"));
	}
}
