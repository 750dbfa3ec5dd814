use log::debug;
use nix::sys::signal::kill as send_signal;

use crate::builtin::take_opts;
use crate::execute::pipeline::handle_fg;
use crate::shellenv::jobs::{JobCmdFlags, JobID};
use crate::shopt::ShOpts;
use crate::signal::{self, sig_from_name, sig_name};
use crate::utils::write_out;
use crate::prelude::*;

/// `%spec`, or a bare job number
fn parse_job_id(arg: &str, rash: &Rash) -> RashResult<usize> {
	let spec = if arg.is_digits() { format!("%{arg}") } else { arg.to_string() };
	rash.jobs().resolve_spec(&spec)
		.ok_or_else(|| RashErr::exec(format!("{arg}: no such job")))
}

/// `jobs [-lp] [spec...]`
pub fn jobs(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let (opts, specs) = take_opts(&argv[1..], "lp")?;
	let mut flags = JobCmdFlags::empty();
	for opt in opts {
		match opt {
			'l' => flags |= JobCmdFlags::LONG,
			'p' => flags |= JobCmdFlags::PIDS,
			_ => {}
		}
	}
	let untraced = rash.meta().has_opt(ShOpts::MONITOR);
	rash.jobs_mut().reap(untraced)?;

	let ids: Vec<usize> = if specs.is_empty() {
		rash.jobs().jobs().filter_map(|job| job.table_id()).collect()
	} else {
		specs.iter().map(|spec| parse_job_id(spec, rash)).collect::<RashResult<_>>()?
	};
	let mut out = String::new();
	for id in &ids {
		let marker = rash.jobs().marker(*id);
		if let Some(job) = rash.jobs().query(JobID::TableID(*id)) {
			out.push_str(&job.display(marker, flags));
			out.push('\n');
		}
	}
	write_out(&out)?;

	// Listing a finished job counts as telling the user about it
	for id in ids {
		let done = rash.jobs().query(JobID::TableID(id)).is_some_and(|job| !job.is_alive());
		if done {
			rash.jobs_mut().remove_job(id);
		}
	}
	rash.set_code(0);
	Ok(())
}

/// `fg [spec]` and `bg [spec...]`
pub fn continue_job(argv: &[String], rash: &mut Rash, fg: bool) -> RashResult<()> {
	if !rash.meta().has_opt(ShOpts::MONITOR) {
		return Err(RashErr::exec("job control not enabled"))
	}
	let specs: Vec<String> = if argv.len() > 1 { argv[1..].to_vec() } else { vec!["%%".into()] };
	if fg {
		let id = parse_job_id(&specs[0], rash)?;
		let Some(mut job) = rash.jobs_mut().remove_job(id) else {
			return Err(RashErr::exec(format!("{}: no such job", specs[0])))
		};
		write_out(&format!("{}\n", job.cmd()))?;
		rash.give_terminal(job.pgid());
		job.killpg(Signal::SIGCONT)?;
		job.mark_continued();
		return handle_fg(rash, job)
	}

	for spec in &specs {
		let id = parse_job_id(spec, rash)?;
		let Some(job) = rash.jobs_mut().query_mut(JobID::TableID(id)) else {
			continue
		};
		job.killpg(Signal::SIGCONT)?;
		job.mark_continued();
		let line = format!("[{id}] {} &\n", job.cmd());
		rash.jobs_mut().make_current(id);
		write_out(&line)?;
	}
	rash.set_code(0);
	Ok(())
}

/// Block until job `id` is no longer running.
/// `Some(status)` when a trapped signal cut the wait short.
fn wait_job(rash: &mut Rash, id: usize) -> RashResult<Option<i32>> {
	loop {
		let next = rash.jobs().query(JobID::TableID(id))
			.and_then(|job| job.get_children().iter().find(|child| child.is_running()))
			.map(|child| child.pid());
		let Some(pid) = next else {
			return Ok(None)
		};
		match rash.jobs_mut().wait_for(Some(pid), false, false) {
			Ok(Some(_)) => {}
			Ok(None) => {
				debug!("{pid} was reaped elsewhere");
				return Ok(None)
			}
			Err(e) if matches!(e.low(), RashErrLow::ErrNo(Errno::EINTR)) => {
				if let Some(sig) = signal::peek_pending() {
					return Ok(Some(128 + sig))
				}
			}
			Err(e) => return Err(e)
		}
	}
}

/// `wait [pid|%job...]`
pub fn wait(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let args = &argv[1..];
	if args.is_empty() {
		let ids: Vec<usize> = rash.jobs().jobs().filter_map(|job| job.table_id()).collect();
		for id in ids {
			if let Some(status) = wait_job(rash, id)? {
				rash.set_code(status);
				return Ok(())
			}
		}
		rash.jobs_mut().take_done();
		rash.set_code(0);
		return Ok(())
	}

	let mut status = 0;
	for arg in args {
		let id = if arg.starts_with('%') {
			rash.jobs().resolve_spec(arg)
		} else {
			let Ok(pid) = arg.parse::<i32>() else {
				return Err(RashErr::usage(format!("Illegal number: {arg}")))
			};
			rash.jobs().query(JobID::Pid(Pid::from_raw(pid))).and_then(|job| job.table_id())
		};
		let Some(id) = id else {
			status = 127;
			continue
		};
		if let Some(interrupted) = wait_job(rash, id)? {
			rash.set_code(interrupted);
			return Ok(())
		}
		let Some(job) = rash.jobs().query(JobID::TableID(id)) else {
			continue
		};
		status = job.status();
		if !job.is_alive() {
			rash.jobs_mut().remove_job(id);
		}
	}
	rash.set_code(status);
	Ok(())
}

/// `kill [-s sig | -n num | -sig] target...` and `kill -l [status]`
pub fn kill(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let mut args = &argv[1..];
	let mut sig: Option<i32> = Some(libc::SIGTERM);

	match args.first().map(|arg| arg.as_str()) {
		Some("-l") | Some("-L") => {
			let mut out = String::new();
			match args.get(1) {
				Some(status) => {
					let num = status.parse::<i32>()
						.map_err(|_| RashErr::usage(format!("Illegal number: {status}")))?;
					let num = if num > 128 { num - 128 } else { num };
					out.push_str(&format!("{}\n", sig_name(num)));
				}
				None => {
					for num in 1..signal::NSIG as i32 {
						if Signal::try_from(num).is_ok() {
							out.push_str(&format!("{}\n", sig_name(num)));
						}
					}
				}
			}
			write_out(&out)?;
			rash.set_code(0);
			return Ok(())
		}
		Some("-s") | Some("-n") => {
			let Some(name) = args.get(1) else {
				return Err(RashErr::usage("option requires an argument"))
			};
			sig = sig_from_name(name);
			args = &args[2..];
		}
		Some("--") => args = &args[1..],
		Some(opt) if opt.starts_with('-') && opt.len() > 1 && !opt[1..].starts_with('-') => {
			sig = sig_from_name(&opt[1..]);
			args = &args[1..];
		}
		_ => {}
	}
	let Some(sig) = sig else {
		return Err(RashErr::usage("invalid signal"))
	};
	let signal = if sig == 0 { None } else { Some(Signal::try_from(sig)?) };
	if args.is_empty() {
		return Err(RashErr::usage("usage: kill [-s sigspec | -signum | -sigspec] [pid | job]... or kill -l [exitstatus]"))
	}

	let mut status = 0;
	for target in args {
		let result = if target.starts_with('%') {
			parse_job_id(target, rash).and_then(|id| {
				match rash.jobs().query(JobID::TableID(id)) {
					Some(job) => match signal {
						Some(signal) => job.killpg(signal),
						None => Ok(())
					}
					None => Err(RashErr::exec(format!("{target}: no such job")))
				}
			})
		} else {
			match target.parse::<i32>() {
				Ok(pid) => send_signal(Pid::from_raw(pid), signal)
					.map_err(|errno| RashErr::exec(format!("{target}: {}", errno.desc()))),
				Err(_) => Err(RashErr::usage(format!("Illegal number: {target}")))
			}
		};
		if let Err(e) = result {
			// Job and pid errors already name the target
			rash.report(&format!("kill: {}", e.low()));
			status = 1;
		}
	}
	rash.set_code(status);
	Ok(())
}

#[cfg(test)]
mod tests {
	use crate::interpret::eval_string;
	use crate::prelude::*;

	#[test]
	fn wait_for_unknown_pid() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "wait 999999").unwrap();
		assert_eq!(rash.get_status(), 127);
	}

	#[test]
	fn wait_collects_every_job() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "(exit 1) & (exit 2) & wait").unwrap();
		assert_eq!(rash.get_status(), 0);
		assert!(rash.jobs().is_empty());
	}

	#[test]
	fn kill_zero_checks_the_process_exists() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "kill -0 $$").unwrap();
		assert_eq!(rash.get_status(), 0);
	}
}
