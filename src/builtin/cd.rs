use log::debug;

use crate::builtin::take_opts;
use crate::utils::{decode_os, to_path, write_out};
use crate::prelude::*;

/// Resolve `.` and `..` textually, the way a logical `cd` sees the path
fn normalize(path: &str) -> String {
	let mut parts: Vec<&str> = vec![];
	for part in path.split('/') {
		match part {
			"" | "." => {}
			".." => { parts.pop(); }
			_ => parts.push(part)
		}
	}
	format!("/{}", parts.join("/"))
}

/// Candidate directories for a relative operand, following CDPATH.
/// The flag says whether the new directory should be printed.
fn candidates(rash: &Rash, dir: &str) -> Vec<(String, bool)> {
	let explicit = dir.starts_with('/') || dir == "." || dir == ".."
		|| dir.starts_with("./") || dir.starts_with("../");
	let mut found = vec![];
	if !explicit {
		if let Some(cdpath) = rash.get_var("CDPATH") {
			for prefix in cdpath.split(':') {
				if prefix.is_empty() {
					continue
				}
				let joined = format!("{}/{dir}", prefix.trim_end_matches('/'));
				found.push((joined, true));
			}
		}
	}
	found.push((dir.to_string(), false));
	found
}

/// `cd [-L|-P] [dir|-]`
pub fn execute(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let (opts, args) = take_opts(&argv[1..], "LP")?;
	let physical = opts.last() == Some(&'P');
	let (target, mut print) = match args.first().map(|arg| arg.as_str()) {
		None => match rash.get_var("HOME") {
			Some(home) if !home.is_empty() => (home.to_string(), false),
			_ => return Err(RashErr::exec("HOME not set"))
		}
		Some("-") => match rash.get_var("OLDPWD") {
			Some(old) => (old.to_string(), true),
			None => return Err(RashErr::exec("OLDPWD not set"))
		}
		Some(dir) => (dir.to_string(), false)
	};

	let cur = rash.get_var("PWD").map(|pwd| pwd.to_string())
		.or_else(|| env::current_dir().ok().map(|dir| decode_os(dir.as_os_str())))
		.unwrap_or_else(|| "/".into());

	let mut last_err = None;
	let mut landed = None;
	for (candidate, from_cdpath) in candidates(rash, &target) {
		let logical = if candidate.starts_with('/') {
			normalize(&candidate)
		} else {
			normalize(&format!("{cur}/{candidate}"))
		};
		let attempt = if physical { candidate.clone() } else { logical.clone() };
		match env::set_current_dir(to_path(&attempt)) {
			Ok(()) => {
				print |= from_cdpath;
				landed = Some(logical);
				break
			}
			Err(e) => {
				debug!("cd: {attempt}: {e}");
				last_err = Some(e);
			}
		}
	}

	let Some(logical) = landed else {
		let reason = last_err
			.and_then(|e| e.raw_os_error())
			.map(|code| Errno::from_raw(code).desc())
			.unwrap_or("No such file or directory");
		return Err(RashErr::exec(format!("can't cd to {target}: {reason}")))
	};

	let new_pwd = if physical {
		decode_os(env::current_dir()?.as_os_str())
	} else {
		logical
	};
	rash.vars_mut().export_var("OLDPWD", &cur)?;
	rash.vars_mut().export_var("PWD", &new_pwd)?;
	rash.logic_mut().forget_relative();
	if print {
		write_out(&format!("{new_pwd}\n"))?;
	}
	rash.set_code(0);
	Ok(())
}

/// `pwd [-L|-P]`
pub fn pwd(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let (opts, _) = take_opts(&argv[1..], "LP")?;
	let physical = opts.last() == Some(&'P');
	let logical = rash.get_var("PWD")
		.filter(|pwd| !physical && pwd.starts_with('/'))
		.map(|pwd| pwd.to_string());
	let dir = match logical {
		Some(dir) => dir,
		None => decode_os(env::current_dir()?.as_os_str())
	};
	write_out(&format!("{dir}\n"))?;
	rash.set_code(0);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn logical_paths() {
		assert_eq!(normalize("/usr/local/../bin/./"), "/usr/bin");
		assert_eq!(normalize("/.."), "/");
		assert_eq!(normalize("//a//b"), "/a/b");
	}

	#[test]
	fn cdpath_comes_first() {
		let mut rash = Rash::new();
		rash.set_var("CDPATH", "/tmp:").unwrap();
		let found = candidates(&rash, "sub");
		assert_eq!(found, vec![("/tmp/sub".to_string(), true), ("sub".to_string(), false)]);
		assert_eq!(candidates(&rash, "./sub"), vec![("./sub".to_string(), false)]);
	}
}
