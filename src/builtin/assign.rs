use crate::builtin::take_opts;
use crate::shellenv::vars::VarFlags;
use crate::utils::write_out;
use crate::prelude::*;

/// List variables carrying `flag` as `prefix name='value'` lines
fn list_flagged(rash: &Rash, flag: VarFlags, prefix: &str) -> RashResult<()> {
	let mut out = String::new();
	for (name, var) in rash.vars().sorted() {
		if !var.flags().contains(flag) {
			continue
		}
		match var.value() {
			Some(value) => out.push_str(&format!("{prefix} {name}={}\n", value.sh_quote())),
			None => out.push_str(&format!("{prefix} {name}\n"))
		}
	}
	write_out(&out)?;
	Ok(())
}

/// Shared body of `export` and `readonly`: `name` adds the flag, `name=value` assigns too
fn flag_vars(argv: &[String], rash: &mut Rash, flag: VarFlags, prefix: &str) -> RashResult<()> {
	let (_, args) = take_opts(&argv[1..], "p")?;
	if args.is_empty() {
		list_flagged(rash, flag, prefix)?;
		rash.set_code(0);
		return Ok(())
	}
	for arg in args {
		let (name, value) = match arg.split_once('=') {
			Some((name, value)) => (name, Some(value)),
			None => (arg.as_str(), None)
		};
		if !name.is_valid_name() {
			return Err(RashErr::exec(format!("{name}: bad variable name")))
		}
		rash.vars_mut().set_var_flags(name, value, flag)?;
		if name == "PATH" && value.is_some() {
			rash.logic_mut().clear_hash();
		}
	}
	rash.set_code(0);
	Ok(())
}

/// `export [-p] [name[=value]...]`
pub fn export(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	flag_vars(argv, rash, VarFlags::EXPORT, "export")
}

/// `readonly [-p] [name[=value]...]`
pub fn readonly(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	flag_vars(argv, rash, VarFlags::READONLY, "readonly")
}

/// `local name[=value]...`. Only meaningful inside a function.
pub fn local(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	if rash.meta().func_depth == 0 {
		return Err(RashErr::exec("not in a function"))
	}
	for arg in &argv[1..] {
		let (name, value) = match arg.split_once('=') {
			Some((name, value)) => (name, Some(value)),
			None => (arg.as_str(), None)
		};
		if !name.is_valid_name() {
			return Err(RashErr::exec(format!("{name}: bad variable name")))
		}
		rash.vars_mut().mark_local(name)?;
		if let Some(value) = value {
			rash.set_var(name, value)?;
		}
	}
	rash.set_code(0);
	Ok(())
}

/// `unset [-f|-v] name...`. Without a flag a variable is removed if there is
/// one, otherwise a function of that name.
pub fn unset(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let (opts, names) = take_opts(&argv[1..], "fv")?;
	let funcs_only = opts.contains(&'f');
	let vars_only = opts.contains(&'v');
	for name in names {
		if funcs_only {
			rash.logic_mut().remove_func(name);
			continue
		}
		let is_var = rash.vars().get(name).is_some();
		if is_var || vars_only {
			rash.unset_var(name)?;
		} else {
			rash.logic_mut().remove_func(name);
		}
	}
	rash.set_code(0);
	Ok(())
}

#[cfg(test)]
mod tests {
	use crate::interpret::eval_string;
	use crate::prelude::*;

	#[test]
	fn export_marks_and_assigns() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "a=1; export a b=2").unwrap();
		assert!(rash.vars().get("a").unwrap().is_exported());
		assert_eq!(rash.get_var("b"), Some("2"));
		assert!(rash.vars().get("b").unwrap().is_exported());
	}

	#[test]
	fn readonly_refuses_changes() {
		let mut rash = Rash::new();
		rash.meta_mut().opts |= crate::shopt::ShOpts::INTERACTIVE;
		eval_string(&mut rash, "readonly r=1; unset r 2>/dev/null").unwrap();
		assert_eq!(rash.get_status(), 1);
		assert_eq!(rash.get_var("r"), Some("1"));
	}

	#[test]
	fn unset_falls_back_to_functions() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "f() { :; }; v=1; unset v f").unwrap();
		assert_eq!(rash.get_var("v"), None);
		assert!(rash.logic().get_func("f").is_none());
	}

	#[test]
	fn local_outside_function_fails() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "local x=1 2>/dev/null").unwrap();
		assert_eq!(rash.get_status(), 1);
	}
}
