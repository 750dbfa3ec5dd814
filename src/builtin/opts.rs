use log::debug;

use crate::shopt::ShOpts;
use crate::utils::write_out;
use crate::prelude::*;

fn list_vars(rash: &Rash) -> RashResult<()> {
	let mut out = String::new();
	for (name, var) in rash.vars().sorted() {
		if let Some(value) = var.value() {
			out.push_str(&format!("{name}={}\n", value.sh_quote()));
		}
	}
	write_out(&out)?;
	Ok(())
}

/// `set -o` lists options as a table, `set +o` as commands that recreate them
fn list_opts(opts: ShOpts, as_commands: bool) -> RashResult<()> {
	let mut out = String::new();
	for (name, on) in opts.describe() {
		if as_commands {
			let sign = if on { '-' } else { '+' };
			out.push_str(&format!("set {sign}o {name}\n"));
		} else {
			let state = if on { "on" } else { "off" };
			out.push_str(&format!("{name:<16}{state}\n"));
		}
	}
	write_out(&out)?;
	Ok(())
}

fn toggle(opts: &mut ShOpts, opt: ShOpts, on: bool, spelled: &str) -> RashResult<()> {
	if !opt.settable() {
		return Err(RashErr::usage(format!("Illegal option {spelled}")))
	}
	opts.set(opt, on);
	Ok(())
}

/// `set [-+abCefmnuvx] [-+o name]... [--] [arg...]`
pub fn set(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let args = &argv[1..];
	if args.is_empty() {
		list_vars(rash)?;
		rash.set_code(0);
		return Ok(())
	}

	let mut opts = rash.meta().opts;
	let mut new_params: Option<&[String]> = None;
	let mut i = 0;
	while i < args.len() {
		let arg = args[i].as_str();
		match arg {
			"--" => {
				new_params = Some(&args[i + 1..]);
				break
			}
			"-" => {
				opts.remove(ShOpts::XTRACE | ShOpts::VERBOSE);
				if i + 1 < args.len() {
					new_params = Some(&args[i + 1..]);
				}
				break
			}
			"-o" | "+o" => {
				let on = arg.starts_with('-');
				match args.get(i + 1) {
					Some(name) => {
						let opt = ShOpts::from_long(name)
							.ok_or_else(|| RashErr::usage(format!("Illegal option {arg} {name}")))?;
						toggle(&mut opts, opt, on, &format!("{arg} {name}"))?;
						i += 2;
					}
					None => {
						list_opts(opts, !on)?;
						i += 1;
					}
				}
			}
			_ if arg.len() > 1 && (arg.starts_with('-') || arg.starts_with('+')) => {
				let on = arg.starts_with('-');
				for ch in arg[1..].chars() {
					let opt = ShOpts::from_letter(ch)
						.ok_or_else(|| RashErr::usage(format!("Illegal option {}{ch}", &arg[..1])))?;
					toggle(&mut opts, opt, on, &format!("{}{ch}", &arg[..1]))?;
				}
				i += 1;
			}
			_ => {
				new_params = Some(&args[i..]);
				break
			}
		}
	}

	let old = rash.meta().opts;
	rash.meta_mut().opts = opts;
	if (old ^ opts).contains(ShOpts::MONITOR) {
		debug!("monitor mode is now {}", opts.contains(ShOpts::MONITOR));
		if opts.contains(ShOpts::MONITOR) && rash.meta().tty_fd.is_none() && !rash.meta().is_subshell() {
			rash.setup_job_control();
		}
		rash.refresh_signals();
	}
	if let Some(params) = new_params {
		rash.vars_mut().set_params(params.to_vec());
	}
	rash.set_code(0);
	Ok(())
}

#[cfg(test)]
mod tests {
	use crate::interpret::eval_string;
	use crate::shopt::ShOpts;
	use crate::prelude::*;

	#[test]
	fn flags_and_params() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "set -eu -o noclobber -- a 'b c'").unwrap();
		let opts = rash.meta().opts;
		assert!(opts.contains(ShOpts::ERREXIT | ShOpts::NOUNSET | ShOpts::NOCLOBBER));
		assert_eq!(rash.vars().params(), &["a".to_string(), "b c".to_string()]);
		eval_string(&mut rash, "set +eu; set +o noclobber").unwrap();
		assert!(!rash.meta().opts.intersects(ShOpts::ERREXIT | ShOpts::NOUNSET | ShOpts::NOCLOBBER));
	}

	#[test]
	fn dollar_dash_reflects_options() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "set -f; flags=$-").unwrap();
		assert!(rash.get_var("flags").unwrap().contains('f'));
	}

	#[test]
	fn bad_option_is_usage_error() {
		let mut rash = Rash::new();
		rash.meta_mut().opts |= ShOpts::INTERACTIVE;
		eval_string(&mut rash, "set -Q 2>/dev/null").unwrap();
		assert_eq!(rash.get_status(), 2);
	}
}
