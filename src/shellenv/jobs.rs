use log::{debug, trace};
use nix::sys::signal::{kill, killpg};
use nix::sys::wait::{waitpid, WaitPidFlag};

use crate::prelude::*;
use crate::signal::sig_desc;

bitflags! {
	#[derive(Debug,Clone,Copy,PartialEq,Eq)]
	pub struct JobCmdFlags: u8 {
		const LONG     = 0b00001; // 0x01
		const PIDS     = 0b00010; // 0x02
		const NEW_ONLY = 0b00100; // 0x04
		const RUNNING  = 0b01000; // 0x08
		const STOPPED  = 0b10000; // 0x10
	}
}

#[derive(Debug,Clone,PartialEq)]
pub enum JobID {
	Pgid(Pid),
	Pid(Pid),
	TableID(usize),
}

#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum JobState {
	Running,
	Stopped,
	Done
}

#[derive(Debug,Clone)]
pub struct ChildProc {
	pid: Pid,
	cmd: String,
	status: WaitStatus
}

impl ChildProc {
	pub fn new(pid: Pid, cmd: &str) -> Self {
		Self { pid, cmd: cmd.to_string(), status: WaitStatus::StillAlive }
	}
	pub fn pid(&self) -> Pid {
		self.pid
	}
	pub fn cmd(&self) -> &str {
		&self.cmd
	}
	pub fn status(&self) -> WaitStatus {
		self.status
	}
	pub fn set_status(&mut self, status: WaitStatus) {
		self.status = status;
	}
	pub fn is_running(&self) -> bool {
		matches!(self.status, WaitStatus::StillAlive | WaitStatus::Continued(_))
	}
	pub fn is_stopped(&self) -> bool {
		matches!(self.status, WaitStatus::Stopped(..))
	}
	pub fn is_done(&self) -> bool {
		matches!(self.status, WaitStatus::Exited(..) | WaitStatus::Signaled(..))
	}
}

/// The exit status `$?` reports for a wait status
pub fn status_code(status: &WaitStatus) -> i32 {
	match status {
		WaitStatus::Exited(_, code) => *code,
		WaitStatus::Signaled(_, sig, _) => 128 + *sig as i32,
		WaitStatus::Stopped(_, sig) => 128 + *sig as i32,
		_ => 0
	}
}

#[derive(Debug,Clone)]
pub struct Job {
	table_id: Option<usize>,
	pgid: Pid,
	/// Set when the children were put in their own process group
	own_group: bool,
	children: Vec<ChildProc>,
	cmd: String,
	/// State changed since the last time it was reported
	changed: bool,
}

impl Job {
	pub fn table_id(&self) -> Option<usize> {
		self.table_id
	}
	pub fn pgid(&self) -> Pid {
		self.pgid
	}
	pub fn own_group(&self) -> bool {
		self.own_group
	}
	pub fn cmd(&self) -> &str {
		&self.cmd
	}
	pub fn get_children(&self) -> &[ChildProc] {
		&self.children
	}
	pub fn get_children_mut(&mut self) -> &mut Vec<ChildProc> {
		&mut self.children
	}
	pub fn last_pid(&self) -> Option<Pid> {
		self.children.last().map(|child| child.pid())
	}

	pub fn state(&self) -> JobState {
		if self.children.iter().all(|child| child.is_done()) {
			JobState::Done
		} else if self.children.iter().any(|child| child.is_running()) {
			JobState::Running
		} else {
			JobState::Stopped
		}
	}

	pub fn is_alive(&self) -> bool {
		self.state() != JobState::Done
	}

	/// The status of the last process in the pipeline
	pub fn status(&self) -> i32 {
		self.children.last().map(|child| status_code(&child.status())).unwrap_or(0)
	}

	/// The signal that stopped the job, if it is stopped
	pub fn stop_signal(&self) -> Option<Signal> {
		self.children.iter().find_map(|child| match child.status() {
			WaitStatus::Stopped(_, sig) => Some(sig),
			_ => None
		})
	}

	pub fn update_by_id(&mut self, id: JobID, status: WaitStatus) -> bool {
		let pid = match id {
			JobID::Pid(pid) => pid,
			_ => return false
		};
		let Some(child) = self.children.iter_mut().find(|child| child.pid() == pid) else {
			return false
		};
		trace!("job {:?}: pid {} -> {:?}", self.table_id, pid, status);
		child.set_status(status);
		self.changed = true;
		true
	}

	/// Every process that is not finished is marked running again
	pub fn mark_continued(&mut self) {
		for child in self.children.iter_mut().filter(|child| child.is_stopped()) {
			child.set_status(WaitStatus::Continued(child.pid()));
		}
	}

	pub fn killpg(&self, sig: Signal) -> RashResult<()> {
		if self.own_group {
			killpg(self.pgid, sig)?;
		} else {
			for child in self.children.iter().filter(|child| !child.is_done()) {
				kill(child.pid(), sig)?;
			}
		}
		Ok(())
	}

	fn state_text(&self) -> String {
		match self.state() {
			JobState::Running => "Running".into(),
			JobState::Stopped => match self.stop_signal() {
				Some(Signal::SIGTSTP) | None => "Stopped".into(),
				Some(sig) => format!("Stopped ({})", sig.as_str().trim_start_matches("SIG")),
			}
			JobState::Done => match self.children.last().map(|child| child.status()) {
				Some(WaitStatus::Signaled(_, sig, core)) => {
					let mut text = sig_desc(sig).to_string();
					if core {
						text.push_str(" (core dumped)");
					}
					text
				}
				Some(WaitStatus::Exited(_, 0)) | None => "Done".into(),
				Some(status) => format!("Done({})", status_code(&status)),
			}
		}
	}

	/// One line of `jobs` output
	pub fn display(&self, marker: char, flags: JobCmdFlags) -> String {
		let id = self.table_id.unwrap_or(0);
		if flags.contains(JobCmdFlags::PIDS) {
			return self.pgid.to_string()
		}
		if flags.contains(JobCmdFlags::LONG) {
			let mut lines = vec![];
			for (i, child) in self.children.iter().enumerate() {
				let prefix = if i == 0 { format!("[{id}]{marker}") } else { String::from("    ") };
				let state = if i == 0 { self.state_text() } else { String::new() };
				lines.push(format!("{prefix} {:<7} {:<24}{}", child.pid(), state, child.cmd()));
			}
			return lines.join("\n")
		}
		format!("[{id}]{marker}  {:<24}{}", self.state_text(), self.cmd)
	}
}

#[derive(Default)]
pub struct JobBuilder {
	pgid: Option<Pid>,
	own_group: bool,
	children: Vec<ChildProc>,
	cmd: Option<String>
}

impl JobBuilder {
	pub fn new() -> Self {
		Self::default()
	}
	pub fn with_pgid(mut self, pgid: Pid, own_group: bool) -> Self {
		self.pgid = Some(pgid);
		self.own_group = own_group;
		self
	}
	pub fn with_children(mut self, children: Vec<ChildProc>) -> Self {
		self.children = children;
		self
	}
	pub fn with_cmd(mut self, cmd: impl Into<String>) -> Self {
		self.cmd = Some(cmd.into());
		self
	}
	pub fn build(self) -> Job {
		let pgid = self.pgid
			.or_else(|| self.children.first().map(|child| child.pid()))
			.unwrap_or(Pid::from_raw(0));
		let cmd = self.cmd.unwrap_or_else(|| {
			self.children.iter().map(|child| child.cmd()).collect::<Vec<_>>().join(" | ")
		});
		Job {
			table_id: None,
			pgid,
			own_group: self.own_group,
			children: self.children,
			cmd,
			changed: false
		}
	}
}

/// Background and stopped jobs, plus the job currently in the foreground
#[derive(Debug,Default)]
pub struct JobTable {
	jobs: Vec<Option<Job>>,
	/// Table ids, least recently used first. The last one is the current job.
	order: Vec<usize>,
	fg: Option<Job>,
}

impl JobTable {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert_job(&mut self, mut job: Job) -> usize {
		let free = self.jobs.iter().position(|job| job.is_none());
		let slot = match free {
			Some(slot) => slot,
			None => {
				self.jobs.push(None);
				self.jobs.len() - 1
			}
		};
		let id = slot + 1;
		job.table_id = Some(id);
		debug!("job [{id}] added: {}", job.cmd());
		self.jobs[slot] = Some(job);
		self.order.push(id);
		id
	}

	pub fn remove_job(&mut self, id: usize) -> Option<Job> {
		let job = self.jobs.get_mut(id.checked_sub(1)?)?.take();
		self.order.retain(|entry| *entry != id);
		while self.jobs.last().is_some_and(|job| job.is_none()) {
			self.jobs.pop();
		}
		if job.is_some() {
			debug!("job [{id}] removed");
		}
		job
	}

	pub fn query(&self, id: JobID) -> Option<&Job> {
		self.jobs().find(|job| Self::matches(job, &id))
	}

	pub fn query_mut(&mut self, id: JobID) -> Option<&mut Job> {
		self.jobs.iter_mut().flatten().find(|job| Self::matches(job, &id))
	}

	fn matches(job: &Job, id: &JobID) -> bool {
		match id {
			JobID::TableID(n) => job.table_id == Some(*n),
			JobID::Pgid(pgid) => job.pgid == *pgid,
			JobID::Pid(pid) => job.children.iter().any(|child| child.pid() == *pid),
		}
	}

	/// Jobs in table order
	pub fn jobs(&self) -> impl Iterator<Item = &Job> {
		self.jobs.iter().flatten()
	}

	pub fn is_empty(&self) -> bool {
		self.jobs().next().is_none()
	}

	pub fn curr_job(&self) -> Option<usize> {
		self.order.last().copied()
	}

	pub fn prev_job(&self) -> Option<usize> {
		self.order.len().checked_sub(2).map(|i| self.order[i])
	}

	pub fn make_current(&mut self, id: usize) {
		self.order.retain(|entry| *entry != id);
		self.order.push(id);
	}

	pub fn marker(&self, id: usize) -> char {
		if self.curr_job() == Some(id) {
			'+'
		} else if self.prev_job() == Some(id) {
			'-'
		} else {
			' '
		}
	}

	pub fn set_fg(&mut self, job: Job) {
		self.fg = Some(job);
	}

	pub fn get_fg(&self) -> Option<&Job> {
		self.fg.as_ref()
	}

	pub fn take_fg(&mut self) -> Option<Job> {
		self.fg.take()
	}

	/// Record a wait status for whichever job owns `pid`
	pub fn update_pid(&mut self, pid: Pid, status: WaitStatus) -> bool {
		if let Some(fg) = self.fg.as_mut() {
			if fg.update_by_id(JobID::Pid(pid), status) {
				return true
			}
		}
		self.query_mut(JobID::Pid(pid))
			.is_some_and(|job| job.update_by_id(JobID::Pid(pid), status))
	}

	/// Collect one status change from any child.
	/// `Ok(None)` means nothing changed (with `nohang`) or there are no children left.
	pub fn wait_any(&mut self, nohang: bool, untraced: bool) -> RashResult<Option<Pid>> {
		self.wait_for(None, nohang, untraced)
	}

	/// Like `wait_any`, but only for one process
	pub fn wait_for(&mut self, target: Option<Pid>, nohang: bool, untraced: bool) -> RashResult<Option<Pid>> {
		let mut flags = WaitPidFlag::empty();
		if nohang {
			flags |= WaitPidFlag::WNOHANG;
		}
		if untraced {
			flags |= WaitPidFlag::WUNTRACED;
		}
		match waitpid(target, Some(flags)) {
			Ok(WaitStatus::StillAlive) => Ok(None),
			Ok(status) => {
				let Some(pid) = status.pid() else {
					return Ok(None)
				};
				if !self.update_pid(pid, status) {
					trace!("reaped untracked child {pid}");
				}
				Ok(Some(pid))
			}
			Err(Errno::ECHILD) => Ok(None),
			Err(e) => Err(e.into())
		}
	}

	/// Reap without blocking until nothing else is ready
	pub fn reap(&mut self, untraced: bool) -> RashResult<()> {
		while self.wait_any(true, untraced)?.is_some() {}
		Ok(())
	}

	/// Finished jobs that nobody has been told about yet are removed and returned
	pub fn take_done(&mut self) -> Vec<(Job, char)> {
		let done: Vec<usize> = self.jobs()
			.filter(|job| job.state() == JobState::Done)
			.filter_map(|job| job.table_id)
			.collect();
		let mut taken = vec![];
		for id in done {
			let marker = self.marker(id);
			if let Some(job) = self.remove_job(id) {
				taken.push((job, marker));
			}
		}
		taken
	}

	/// Jobs that stopped or finished since they were last listed
	pub fn take_changed(&mut self) -> Vec<usize> {
		let mut changed = vec![];
		for job in self.jobs.iter_mut().flatten() {
			if job.changed {
				job.changed = false;
				if let Some(id) = job.table_id {
					changed.push(id);
				}
			}
		}
		changed
	}

	/// Resolve `%n`, `%%`, `%+`, `%-`, `%string` and `%?string`
	pub fn resolve_spec(&self, spec: &str) -> Option<usize> {
		let caps = crate::helper::REGEX["job_spec"].captures(spec)?;
		let Some(body) = caps.name("spec").map(|m| m.as_str()) else {
			return self.curr_job()
		};
		match body {
			"%" | "+" => self.curr_job(),
			"-" => self.prev_job(),
			_ if body.is_digits() => {
				let id = body.parse::<usize>().ok()?;
				self.query(JobID::TableID(id)).map(|_| id)
			}
			_ => {
				let found: Vec<usize> = match body.strip_prefix('?') {
					Some(needle) => self.jobs().filter(|job| job.cmd.contains(needle)).filter_map(|job| job.table_id).collect(),
					None => self.jobs().filter(|job| job.cmd.starts_with(body)).filter_map(|job| job.table_id).collect()
				};
				match found.as_slice() {
					[id] => Some(*id),
					_ => None
				}
			}
		}
	}

	/// Forget everything. A forked child does not own its parent's jobs.
	pub fn clear(&mut self) {
		self.jobs.clear();
		self.order.clear();
		self.fg = None;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn job(pids: &[i32], cmd: &str) -> Job {
		let children = pids.iter().map(|pid| ChildProc::new(Pid::from_raw(*pid), cmd)).collect();
		JobBuilder::new()
			.with_pgid(Pid::from_raw(pids[0]), true)
			.with_children(children)
			.with_cmd(cmd)
			.build()
	}

	#[test]
	fn job_state_follows_children() {
		let mut j = job(&[100, 101], "a | b");
		assert_eq!(j.state(), JobState::Running);
		j.update_by_id(JobID::Pid(Pid::from_raw(100)), WaitStatus::Exited(Pid::from_raw(100), 0));
		assert_eq!(j.state(), JobState::Running);
		j.update_by_id(JobID::Pid(Pid::from_raw(101)), WaitStatus::Stopped(Pid::from_raw(101), Signal::SIGTSTP));
		assert_eq!(j.state(), JobState::Stopped);
		j.mark_continued();
		assert_eq!(j.state(), JobState::Running);
		j.update_by_id(JobID::Pid(Pid::from_raw(101)), WaitStatus::Exited(Pid::from_raw(101), 3));
		assert_eq!(j.state(), JobState::Done);
		assert_eq!(j.status(), 3);
	}

	#[test]
	fn signal_deaths_encode_as_128_plus() {
		let mut j = job(&[200], "sleep 10");
		j.update_by_id(JobID::Pid(Pid::from_raw(200)), WaitStatus::Signaled(Pid::from_raw(200), Signal::SIGTERM, false));
		assert_eq!(j.status(), 143);
		assert_eq!(j.state_text(), "Terminated");
	}

	#[test]
	fn table_ids_reuse_lowest_slot() {
		let mut table = JobTable::new();
		let a = table.insert_job(job(&[1], "a"));
		let b = table.insert_job(job(&[2], "b"));
		let c = table.insert_job(job(&[3], "c"));
		assert_eq!((a, b, c), (1, 2, 3));
		table.remove_job(2);
		assert_eq!(table.insert_job(job(&[4], "d")), 2);
		assert_eq!(table.curr_job(), Some(2));
		assert_eq!(table.prev_job(), Some(3));
		assert_eq!(table.marker(2), '+');
		assert_eq!(table.marker(3), '-');
		assert_eq!(table.marker(1), ' ');
	}

	#[test]
	fn job_specs() {
		let mut table = JobTable::new();
		table.insert_job(job(&[1], "sleep 10"));
		table.insert_job(job(&[2], "vim notes"));
		assert_eq!(table.resolve_spec("%1"), Some(1));
		assert_eq!(table.resolve_spec("%%"), Some(2));
		assert_eq!(table.resolve_spec("%"), Some(2));
		assert_eq!(table.resolve_spec("%-"), Some(1));
		assert_eq!(table.resolve_spec("%sl"), Some(1));
		assert_eq!(table.resolve_spec("%?notes"), Some(2));
		assert_eq!(table.resolve_spec("%9"), None);
	}

	#[test]
	fn display_line() {
		let mut table = JobTable::new();
		let id = table.insert_job(job(&[1], "sleep 10"));
		let j = table.query(JobID::TableID(id)).unwrap();
		assert_eq!(j.display(table.marker(id), JobCmdFlags::empty()), format!("[1]+  {:<24}sleep 10", "Running"));
	}

	#[test]
	fn long_listing_puts_state_on_first_line() {
		let mut table = JobTable::new();
		let id = table.insert_job(job(&[7, 8], "a | b"));
		let j = table.query(JobID::TableID(id)).unwrap();
		let text = j.display(table.marker(id), JobCmdFlags::LONG);
		let lines: Vec<&str> = text.lines().collect();
		assert_eq!(lines, vec![
			format!("[1]+ {:<7} {:<24}a | b", 7, "Running"),
			format!("     {:<7} {:<24}a | b", 8, ""),
		]);
	}
}
