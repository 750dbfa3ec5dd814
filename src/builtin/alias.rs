use crate::builtin::take_opts;
use crate::utils::write_out;
use crate::prelude::*;

/// `alias [name[=value]...]`
/// With no arguments every alias is listed in a form the shell can read back.
pub fn execute(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let args = &argv[1..];
	if args.is_empty() {
		let mut out = String::new();
		for (name, value) in rash.logic().sorted_aliases() {
			out.push_str(&format!("{name}={}\n", value.sh_quote()));
		}
		write_out(&out)?;
		rash.set_code(0);
		return Ok(())
	}

	let mut status = 0;
	for arg in args {
		match arg.split_once('=') {
			Some((name, value)) if !name.is_empty() => {
				rash.logic_mut().set_alias(name, value);
			}
			_ => match rash.logic().get_alias(arg) {
				Some(value) => write_out(&format!("{arg}={}\n", value.sh_quote()))?,
				None => {
					rash.report(&format!("alias: {arg} not found"));
					status = 1;
				}
			}
		}
	}
	rash.set_code(status);
	Ok(())
}

/// `unalias [-a] name...`
pub fn unalias(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let (opts, names) = take_opts(&argv[1..], "a")?;
	if opts.contains(&'a') {
		rash.logic_mut().clear_aliases();
		rash.set_code(0);
		return Ok(())
	}
	let mut status = 0;
	for name in names {
		if rash.logic_mut().remove_alias(name).is_none() {
			rash.report(&format!("unalias: {name} not found"));
			status = 1;
		}
	}
	rash.set_code(status);
	Ok(())
}
