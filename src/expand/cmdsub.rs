use log::{debug, trace};
use nix::sys::wait::waitpid;

use crate::execute::{self, ExecFlags};
use crate::interp::parse::Node;
use crate::shellenv::jobs::status_code;
use crate::prelude::*;

/// Run a command substitution in a forked child and collect its output.
/// The child is always a separate process, so nothing it does reaches this shell.
pub fn run_cmdsub(rash: &mut Rash, body: Option<&Node>) -> RashResult<String> {
	let Some(body) = body else {
		rash.meta_mut().cmdsub_status = Some(0);
		return Ok(String::new())
	};
	let (mut r_pipe, mut w_pipe) = RustFd::pipe()?;

	match unsafe { fork() } {
		Ok(ForkResult::Child) => {
			let _ = r_pipe.close();
			rash.enter_subshell();
			rash.meta().traps.setup_child(ExecFlags::empty());
			if let Err(e) = w_pipe.dup2(&STDOUT_FILENO) {
				rash.exit_child(Err(e.into()))
			}
			let _ = w_pipe.close();
			let result = execute::eval_node(rash, body, ExecFlags::EXIT);
			rash.exit_child(result)
		}
		Ok(ForkResult::Parent { child }) => {
			trace!("command substitution running as {child}");
			w_pipe.close()?;
			let output = r_pipe.read_text();
			r_pipe.close()?;
			let status = loop {
				match waitpid(child, None) {
					Ok(status) => break status_code(&status),
					Err(Errno::EINTR) => continue,
					Err(e) => {
						debug!("lost track of command substitution {child}: {e}");
						break 1
					}
				}
			};
			rash.meta_mut().cmdsub_status = Some(status);
			let mut output = output?;
			let trimmed = output.trim_end_matches('\n').len();
			output.truncate(trimmed);
			Ok(output)
		}
		Err(e) => Err(Low(RashErrLow::Fatal(format!("cannot fork: {e}"))))
	}
}
