use log::{debug, trace};
use nix::unistd::setpgid;

use crate::execute::{eval_node, prepare_child, ExecFlags};
use crate::interp::parse::{NdType, Node};
use crate::shellenv::jobs::{ChildProc, Job, JobBuilder, JobCmdFlags, JobID, JobState};
use crate::shopt::ShOpts;
use crate::signal::sig_desc;
use crate::utils::write_err;
use crate::prelude::*;

fn close_all(pipes: &mut [(RustFd,RustFd)]) {
	for (r_pipe, w_pipe) in pipes.iter_mut() {
		let _ = r_pipe.close();
		let _ = w_pipe.close();
	}
}

/// Fork one child per stage, connected stdout to stdin.
/// Every pipe is made up front so each child can close the ends it doesn't use.
fn launch(rash: &mut Rash, stages: &[&Node], background: bool) -> RashResult<Job> {
	let monitor = rash.meta().has_opt(ShOpts::MONITOR);
	let last = stages.len() - 1;
	let mut pipes = Vec::with_capacity(last);
	for _ in 0..last {
		match RustFd::pipe() {
			Ok(pipe) => pipes.push(pipe),
			Err(e) => {
				close_all(&mut pipes);
				return Err(e.into())
			}
		}
	}

	let mut pgid: Option<Pid> = None;
	let mut children = Vec::with_capacity(stages.len());
	for (i, stage) in stages.iter().enumerate() {
		match unsafe { fork() } {
			Ok(ForkResult::Child) => {
				prepare_child(rash, pgid, background);
				let wired = (|| -> RashResult<()> {
					if i > 0 {
						pipes[i - 1].0.dup2(&STDIN_FILENO)?;
					}
					if i < last {
						pipes[i].1.dup2(&STDOUT_FILENO)?;
					}
					Ok(())
				})();
				close_all(&mut pipes);
				if let Err(e) = wired {
					rash.exit_child(Err(e))
				}
				let result = eval_node(rash, stage, ExecFlags::EXIT);
				rash.exit_child(result)
			}
			Ok(ForkResult::Parent { child }) => {
				let group = *pgid.get_or_insert(child);
				if monitor {
					// Also done by the child, whichever runs first wins
					let _ = setpgid(child, group);
				}
				trace!("stage {i} of pipeline is {child}");
				children.push(ChildProc::new(child, &stage.to_string()));
			}
			Err(e) => {
				close_all(&mut pipes);
				return Err(RashErr::exec(format!("cannot fork: {}", e.desc())))
			}
		}
	}
	close_all(&mut pipes);

	let pgid = pgid.unwrap_or(Pid::from_raw(0));
	Ok(JobBuilder::new()
		.with_pgid(pgid, monitor)
		.with_children(children)
		.build())
}

pub fn exec_pipeline(rash: &mut Rash, cmds: &[Node], flags: ExecFlags) -> RashResult<()> {
	if let [single] = cmds {
		return eval_node(rash, single, flags)
	}
	let stages: Vec<&Node> = cmds.iter().collect();
	let job = launch(rash, &stages, false)?;
	handle_fg(rash, job)
}

/// `cmd &`. The job goes in the table and the shell moves on.
pub fn exec_background(rash: &mut Rash, body: &Node) -> RashResult<()> {
	let job = match &body.nd_type {
		NdType::Pipeline { cmds } => {
			let stages: Vec<&Node> = cmds.iter().collect();
			launch(rash, &stages, true)?
		}
		_ => launch(rash, &[body], true)?
	};
	let last_pid = job.last_pid();
	rash.meta_mut().last_bg = last_pid;
	let id = rash.jobs_mut().insert_job(job);
	if rash.meta().is_interactive() {
		let pid = last_pid.map(|pid| pid.to_string()).unwrap_or_default();
		let _ = write_err(&format!("[{id}] {pid}\n"));
	}
	rash.set_code(0);
	Ok(())
}

/// Wait for a foreground job to finish or stop, then take the terminal back
pub fn handle_fg(rash: &mut Rash, job: Job) -> RashResult<()> {
	let own_group = job.own_group();
	let untraced = rash.meta().has_opt(ShOpts::MONITOR);
	if own_group {
		rash.give_terminal(job.pgid());
	}
	rash.jobs_mut().set_fg(job);

	let waited = loop {
		let next = rash.jobs().get_fg()
			.and_then(|job| job.get_children().iter().find(|child| child.is_running()))
			.map(|child| child.pid());
		let Some(pid) = next else {
			break Ok(())
		};
		match rash.jobs_mut().wait_for(Some(pid), false, untraced) {
			Ok(Some(_)) => {}
			Ok(None) => {
				debug!("no children left while a foreground job was running");
				break Ok(())
			}
			Err(e) if matches!(e.low(), RashErrLow::ErrNo(Errno::EINTR)) => continue,
			Err(e) => break Err(e)
		}
	};

	if own_group {
		rash.reclaim_terminal();
	}
	let Some(job) = rash.jobs_mut().take_fg() else {
		return waited
	};
	waited?;

	if job.state() == JobState::Stopped {
		let sig = job.stop_signal().map(|sig| sig as i32).unwrap_or(libc::SIGTSTP);
		let id = rash.jobs_mut().insert_job(job);
		let marker = rash.jobs().marker(id);
		if let Some(job) = rash.jobs().query(JobID::TableID(id)) {
			let _ = write_err(&format!("\n{}\n", job.display(marker, JobCmdFlags::empty())));
		}
		rash.set_code(128 + sig);
		return Ok(())
	}

	if let Some(WaitStatus::Signaled(_, sig, core)) = job.get_children().last().map(|child| child.status()) {
		match sig {
			Signal::SIGINT => {
				if rash.meta().is_interactive() {
					let _ = write_err("\n");
				}
			}
			Signal::SIGPIPE => {}
			_ => {
				let suffix = if core { " (core dumped)" } else { "" };
				let _ = write_err(&format!("{}{suffix}\n", sig_desc(sig)));
			}
		}
	}
	rash.set_code(job.status());
	Ok(())
}

#[cfg(test)]
mod tests {
	use crate::interpret::eval_string;
	use crate::prelude::*;

	#[test]
	fn status_is_last_stage() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "false | true").unwrap();
		assert_eq!(rash.get_status(), 0);
		eval_string(&mut rash, "true | false").unwrap();
		assert_eq!(rash.get_status(), 1);
		eval_string(&mut rash, "! true | false").unwrap();
		assert_eq!(rash.get_status(), 0);
	}

	#[test]
	fn stages_run_in_children() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "x=1; x=2 | x=3; echo | { read x; }").unwrap();
		assert_eq!(rash.get_var("x"), Some("1"));
	}

	#[test]
	fn background_jobs_are_tracked() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "exit 3 &").unwrap();
		assert_eq!(rash.get_status(), 0);
		assert!(rash.meta().last_bg.is_some());
		assert!(!rash.jobs().is_empty());
		eval_string(&mut rash, "wait $!").unwrap();
		assert_eq!(rash.get_status(), 3);
	}
}
