use log::debug;

use crate::helper::parse_count;
use crate::interpret;
use crate::utils::{decode_bytes, to_path};
use crate::prelude::*;

/// Parse the optional numeric operand of `exit`/`return`
fn status_arg(argv: &[String], rash: &Rash) -> RashResult<i32> {
	match argv.get(1) {
		None => Ok(rash.get_status()),
		Some(arg) => match parse_count(arg) {
			Some(code) if code >= 0 => Ok((code & 0xff) as i32),
			_ => Err(RashErr::usage(format!("Illegal number: {arg}")))
		}
	}
}

/// `exit [n]`
pub fn exit(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let code = status_arg(argv, rash)?;
	Err(Low(RashErrLow::CleanExit(code)))
}

/// `return [n]`, from a function or a sourced file
pub fn func_return(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let code = status_arg(argv, rash)?;
	if rash.meta().func_depth == 0 && rash.meta().dot_depth == 0 {
		return Err(RashErr::exec("not in a function"))
	}
	Err(Low(RashErrLow::FuncReturn(code)))
}

/// `break [n]` and `continue [n]`. Outside of a loop they do nothing.
pub fn loop_break(argv: &[String], rash: &mut Rash, cont: bool) -> RashResult<()> {
	let levels = match argv.get(1) {
		None => 1,
		Some(arg) => match parse_count(arg) {
			Some(n) if n > 0 => n as usize,
			_ => return Err(RashErr::usage(format!("Illegal number: {arg}")))
		}
	};
	let depth = rash.meta().loop_depth;
	rash.set_code(0);
	if depth == 0 {
		return Ok(())
	}
	let levels = levels.min(depth);
	if cont {
		Err(Low(RashErrLow::LoopCont(levels)))
	} else {
		Err(Low(RashErrLow::LoopBreak(levels)))
	}
}

/// `shift [n]`
pub fn shift(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let count = match argv.get(1) {
		None => 1,
		Some(arg) => match parse_count(arg) {
			Some(n) if n >= 0 => n as usize,
			_ => return Err(RashErr::usage(format!("Illegal number: {arg}")))
		}
	};
	if !rash.vars_mut().shift_params(count) {
		return Err(RashErr::exec("can't shift that many"))
	}
	rash.set_code(0);
	Ok(())
}

/// `eval [arg...]`. The arguments are joined with spaces and run as source.
pub fn eval(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let text = argv[1..].join(" ");
	rash.set_code(0);
	if text.trim().is_empty() {
		return Ok(())
	}
	interpret::eval_string(rash, &text)
}

/// `. file [args...]`. A name without a slash is searched for in PATH.
pub fn source(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let Some(name) = argv.get(1) else {
		return Err(RashErr::usage("filename argument required"))
	};
	let path = if name.contains('/') {
		to_path(name)
	} else {
		let path_var = rash.get_var("PATH").unwrap_or_default();
		path_var.split(':')
			.map(|dir| to_path(if dir.is_empty() { "." } else { dir }).join(to_path(name)))
			.find(|candidate| candidate.is_file())
			.unwrap_or_else(|| to_path(name))
	};
	let text = std::fs::read(&path)
		.map(|bytes| decode_bytes(&bytes))
		.map_err(|e| {
			let errno = e.raw_os_error().map(Errno::from_raw).unwrap_or(Errno::ENOENT);
			RashErr::exec(format!("cannot open {name}: {}", errno.desc()))
		})?;
	debug!("sourcing {}", path.display());

	let saved_params = (argv.len() > 2).then(|| rash.vars_mut().swap_params(argv[2..].to_vec()));
	rash.meta_mut().dot_depth += 1;
	rash.set_code(0);
	let result = interpret::eval_string(rash, &text);
	rash.meta_mut().dot_depth -= 1;
	if let Some(params) = saved_params {
		rash.vars_mut().swap_params(params);
	}

	match result {
		Err(e) => match e.low() {
			RashErrLow::FuncReturn(code) => {
				rash.set_code(*code);
				Ok(())
			}
			_ => Err(e)
		}
		Ok(()) => Ok(())
	}
}

#[cfg(test)]
mod tests {
	use crate::interpret::eval_string;
	use crate::prelude::*;
	use std::io::Write as _;

	#[test]
	fn shift_and_errors() {
		let mut rash = Rash::new();
		rash.meta_mut().opts |= crate::shopt::ShOpts::INTERACTIVE;
		rash.vars_mut().set_params(vec!["a".into(), "b".into(), "c".into()]);
		eval_string(&mut rash, "shift 2").unwrap();
		assert_eq!(rash.vars().params(), &["c".to_string()]);
		eval_string(&mut rash, "shift 5 2>/dev/null").unwrap();
		assert_eq!(rash.get_status(), 1);
		assert_eq!(rash.vars().params().len(), 1);
	}

	#[test]
	fn special_builtin_errors_end_scripts() {
		let mut rash = Rash::new();
		let result = eval_string(&mut rash, "shift 5 2>/dev/null; reached=1");
		assert!(matches!(result.map_err(|e| e.into_low()), Err(RashErrLow::CleanExit(1))));
		assert_eq!(rash.get_var("reached"), None);
	}

	#[test]
	fn eval_joins_arguments() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "cmd='x=1'; eval \"$cmd\" ';' y=2").unwrap();
		assert_eq!(rash.get_var("x"), Some("1"));
		assert_eq!(rash.get_var("y"), Some("2"));
	}

	#[test]
	fn exit_carries_status() {
		let mut rash = Rash::new();
		let result = eval_string(&mut rash, "exit 300");
		assert!(matches!(result.map_err(|e| e.into_low()), Err(RashErrLow::CleanExit(44))));
	}

	#[test]
	fn dot_runs_in_this_shell() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "sourced=$1; return 3; sourced=late").unwrap();
		let path = file.path().display().to_string();
		let mut rash = Rash::new();
		eval_string(&mut rash, &format!(". {path} arg")).unwrap();
		assert_eq!(rash.get_var("sourced"), Some("arg"));
		assert_eq!(rash.get_status(), 3);
		assert!(rash.vars().params().is_empty());
	}
}
