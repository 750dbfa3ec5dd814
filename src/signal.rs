use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, trace, warn};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet};

use crate::execute::ExecFlags;
use crate::prelude::*;

/// One past the highest signal number the trap table tracks
pub const NSIG: usize = 65;

// The handler only ever touches these flags. Everything else happens at safe points.
static PENDING: [AtomicBool; NSIG] = [const { AtomicBool::new(false) }; NSIG];
static GOT_SIGNAL: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(sig: libc::c_int) {
	if let Some(flag) = PENDING.get(sig as usize) {
		flag.store(true, Ordering::SeqCst);
	}
	GOT_SIGNAL.store(true, Ordering::SeqCst);
}

pub fn signal_pending() -> bool {
	GOT_SIGNAL.load(Ordering::SeqCst)
}

/// Check and clear the pending flag for one signal
pub fn take_pending(sig: Signal) -> bool {
	PENDING[sig as usize].swap(false, Ordering::SeqCst)
}

/// The lowest numbered signal waiting to be handled, left pending
pub fn peek_pending() -> Option<i32> {
	if !signal_pending() {
		return None
	}
	(1..NSIG).find(|&num| PENDING[num].load(Ordering::SeqCst)).map(|num| num as i32)
}

fn install(sig: Signal, handler: SigHandler) {
	let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
	// No SA_RESTART, so a blocking wait or read comes back with EINTR and the
	// shell gets a chance to look at what arrived
	if let Err(e) = unsafe { sigaction(sig, &action) } {
		warn!("failed to set disposition of {sig}: {e}");
	}
}

fn is_ignored(sig: Signal) -> bool {
	let dfl = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
	match unsafe { sigaction(sig, &dfl) } {
		Ok(old) => {
			let _ = unsafe { sigaction(sig, &old) };
			old.handler() == SigHandler::SigIgn
		}
		Err(_) => false
	}
}

/// `EXIT` is 0, everything else is its signal number
pub fn sig_from_name(name: &str) -> Option<i32> {
	if name.is_digits() {
		let num = name.parse::<i32>().ok()?;
		return (num == 0 || Signal::try_from(num).is_ok()).then_some(num)
	}
	let upper = name.to_ascii_uppercase();
	let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
	if bare == "EXIT" {
		return Some(0)
	}
	Signal::iterator()
		.find(|sig| sig.as_str().trim_start_matches("SIG") == bare)
		.map(|sig| sig as i32)
}

pub fn sig_name(num: i32) -> String {
	if num == 0 {
		return "EXIT".into()
	}
	match Signal::try_from(num) {
		Ok(sig) => sig.as_str().trim_start_matches("SIG").to_string(),
		Err(_) => num.to_string()
	}
}

/// How a death by this signal is reported
pub fn sig_desc(sig: Signal) -> &'static str {
	match sig {
		Signal::SIGHUP => "Hangup",
		Signal::SIGINT => "Interrupt",
		Signal::SIGQUIT => "Quit",
		Signal::SIGILL => "Illegal instruction",
		Signal::SIGTRAP => "Trace/breakpoint trap",
		Signal::SIGABRT => "Aborted",
		Signal::SIGBUS => "Bus error",
		Signal::SIGFPE => "Floating point exception",
		Signal::SIGKILL => "Killed",
		Signal::SIGUSR1 => "User defined signal 1",
		Signal::SIGSEGV => "Segmentation fault",
		Signal::SIGUSR2 => "User defined signal 2",
		Signal::SIGPIPE => "Broken pipe",
		Signal::SIGALRM => "Alarm clock",
		Signal::SIGTERM => "Terminated",
		Signal::SIGXCPU => "CPU time limit exceeded",
		Signal::SIGXFSZ => "File size limit exceeded",
		Signal::SIGVTALRM => "Virtual timer expired",
		Signal::SIGPROF => "Profiling timer expired",
		Signal::SIGSYS => "Bad system call",
		_ => "Killed by signal"
	}
}

#[derive(Debug,Clone,PartialEq)]
pub enum TrapAction {
	/// `trap '' SIG`
	Ignore,
	Command(String)
}

#[derive(Debug,Clone,Default)]
pub struct TrapTable {
	traps: HashMap<i32,TrapAction>,
	/// Signals that were ignored when a non-interactive shell started. These stay ignored.
	ignored_at_entry: Vec<i32>,
}

impl TrapTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Remember which signals came in ignored so `trap` leaves them alone
	pub fn record_entry_state(&mut self) {
		for sig in [Signal::SIGINT, Signal::SIGQUIT, Signal::SIGTERM, Signal::SIGHUP] {
			if is_ignored(sig) {
				debug!("{sig} ignored on entry");
				self.ignored_at_entry.push(sig as i32);
			}
		}
	}

	pub fn get(&self, sig: i32) -> Option<&TrapAction> {
		self.traps.get(&sig)
	}

	pub fn is_locked(&self, sig: i32) -> bool {
		self.ignored_at_entry.contains(&sig)
	}

	pub fn sorted(&self) -> Vec<(i32,&TrapAction)> {
		let mut traps: Vec<_> = self.traps.iter().map(|(sig, action)| (*sig, action)).collect();
		traps.sort_by_key(|(sig, _)| *sig);
		traps
	}

	/// Set or clear a trap and give the signal the matching disposition
	pub fn set(&mut self, sig: i32, action: Option<TrapAction>, shell_mode: ShellSigMode) {
		if self.is_locked(sig) {
			return
		}
		match action {
			Some(action) => { self.traps.insert(sig, action); }
			None => { self.traps.remove(&sig); }
		}
		if sig != 0 {
			if let Ok(signal) = Signal::try_from(sig) {
				let handler = self.handler_for(signal, shell_mode);
				install(signal, handler);
			}
		}
	}

	fn handler_for(&self, sig: Signal, mode: ShellSigMode) -> SigHandler {
		match self.traps.get(&(sig as i32)) {
			Some(TrapAction::Ignore) => SigHandler::SigIgn,
			Some(TrapAction::Command(_)) => SigHandler::Handler(handle_signal),
			None => mode.default_handler(sig),
		}
	}

	/// Install the shell's own dispositions, respecting any traps
	pub fn setup_shell(&self, mode: ShellSigMode) {
		for sig in MANAGED {
			if self.is_locked(sig as i32) {
				continue
			}
			install(sig, self.handler_for(sig, mode));
		}
	}

	/// Forked children start from default dispositions except where a trap says ignore.
	/// Commands run without job control in the background also ignore SIGINT and SIGQUIT.
	pub fn setup_child(&self, flags: ExecFlags) {
		for sig in MANAGED {
			let ignore = self.is_locked(sig as i32)
				|| self.traps.get(&(sig as i32)) == Some(&TrapAction::Ignore)
				|| (flags.contains(ExecFlags::BG_NO_MONITOR) && matches!(sig, Signal::SIGINT | Signal::SIGQUIT));
			install(sig, if ignore { SigHandler::SigIgn } else { SigHandler::SigDfl });
		}
		for (sig, action) in &self.traps {
			if let (TrapAction::Command(_), Ok(signal)) = (action, Signal::try_from(*sig)) {
				install(signal, SigHandler::SigDfl);
			}
		}
	}

	/// A subshell keeps traps that ignore and forgets the rest
	pub fn reset_for_subshell(&mut self) {
		self.traps.retain(|_, action| *action == TrapAction::Ignore);
	}

	pub fn take_exit_trap(&mut self) -> Option<String> {
		match self.traps.remove(&0) {
			Some(TrapAction::Command(cmd)) => Some(cmd),
			_ => None
		}
	}
}

/// Signals whose disposition depends on how the shell is running
const MANAGED: [Signal;6] = [
	Signal::SIGINT,
	Signal::SIGQUIT,
	Signal::SIGTERM,
	Signal::SIGTSTP,
	Signal::SIGTTIN,
	Signal::SIGTTOU,
];

#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub struct ShellSigMode {
	pub interactive: bool,
	pub monitor: bool
}

impl ShellSigMode {
	fn default_handler(&self, sig: Signal) -> SigHandler {
		match sig {
			Signal::SIGINT if self.interactive => SigHandler::Handler(handle_signal),
			Signal::SIGQUIT | Signal::SIGTERM if self.interactive => SigHandler::SigIgn,
			Signal::SIGTSTP | Signal::SIGTTIN | Signal::SIGTTOU if self.monitor => SigHandler::SigIgn,
			_ => SigHandler::SigDfl
		}
	}
}

/// Run the traps of every signal that arrived since the last check.
/// The exit status is saved around each trap so `$?` is unchanged afterwards.
/// An untrapped SIGINT in an interactive shell comes back as `Interrupted`.
pub fn run_pending_traps(rash: &mut Rash) -> RashResult<()> {
	if rash.meta().in_trap() || !GOT_SIGNAL.swap(false, Ordering::SeqCst) {
		return Ok(())
	}
	let mut interrupted = false;
	for num in 1..NSIG {
		if !PENDING[num].swap(false, Ordering::SeqCst) {
			continue
		}
		trace!("signal {num} is pending");
		let action = rash.meta().traps.get(num as i32).cloned();
		match action {
			Some(TrapAction::Command(cmd)) => {
				let status = rash.get_status();
				rash.meta_mut().set_in_trap(true);
				let result = crate::interpret::eval_string(rash, &cmd);
				rash.meta_mut().set_in_trap(false);
				match result {
					Err(e) if e.is_control_flow() => {
						// Signals after this one still need a turn at the next safe point
						if PENDING[num + 1..].iter().any(|flag| flag.load(Ordering::SeqCst)) {
							GOT_SIGNAL.store(true, Ordering::SeqCst);
						}
						return Err(e)
					}
					Err(e) => rash.report_err(&e),
					Ok(()) => {}
				}
				rash.set_code(status);
			}
			Some(TrapAction::Ignore) => {}
			None => {
				if num == Signal::SIGINT as usize && rash.meta().is_interactive() {
					interrupted = true;
				}
			}
		}
	}
	if interrupted {
		return Err(Low(RashErrLow::Interrupted))
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn names_and_numbers() {
		assert_eq!(sig_from_name("INT"), Some(2));
		assert_eq!(sig_from_name("sigterm"), Some(15));
		assert_eq!(sig_from_name("EXIT"), Some(0));
		assert_eq!(sig_from_name("0"), Some(0));
		assert_eq!(sig_from_name("9"), Some(9));
		assert_eq!(sig_from_name("NOPE"), None);
		assert_eq!(sig_name(0), "EXIT");
		assert_eq!(sig_name(10), "USR1");
	}

	#[test]
	fn handler_only_sets_flags() {
		handle_signal(Signal::SIGUSR2 as libc::c_int);
		assert!(signal_pending());
		assert!(take_pending(Signal::SIGUSR2));
		assert!(!take_pending(Signal::SIGUSR2));
	}

	#[test]
	fn subshells_keep_only_ignored_traps() {
		let mut table = TrapTable::new();
		table.traps.insert(0, TrapAction::Command("echo bye".into()));
		table.traps.insert(15, TrapAction::Ignore);
		table.reset_for_subshell();
		assert_eq!(table.get(0), None);
		assert_eq!(table.get(15), Some(&TrapAction::Ignore));
	}
}
