use log::{debug, trace};
use nix::sys::stat::{fstat, stat, SFlag};

use crate::expand;
use crate::interp::parse::{Redir, RedirTarget};
use crate::interp::token::RedirOp;
use crate::shopt::ShOpts;
use crate::utils::{close_raw, encode_str};
use crate::prelude::*;

/// Descriptors at or above this are the shell's own scratch space
const SAVE_FLOOR: RawFd = 10;

#[derive(Debug)]
struct SavedFd {
	slot: RawFd,
	/// `None` when the slot was closed before the redirection
	saved: Option<RustFd>,
}

/// One frame of saved descriptors per redirected construct that hands control back
/// to the shell. Frames are undone newest first.
#[derive(Debug,Default)]
pub struct RedirStack {
	frames: Vec<Vec<SavedFd>>
}

impl RedirStack {
	pub fn push_frame(&mut self) {
		self.frames.push(vec![]);
	}

	pub fn depth(&self) -> usize {
		self.frames.len()
	}

	/// Remember what `slot` holds before it gets overwritten. Only the first
	/// redirection of a slot in a frame needs saving.
	fn save(&mut self, slot: RawFd) -> RashResult<()> {
		let Some(frame) = self.frames.last_mut() else {
			return Ok(())
		};
		if frame.iter().any(|saved| saved.slot == slot) {
			return Ok(())
		}
		let saved = if RustFd::is_open(slot) {
			Some(RustFd::dup_high(slot, SAVE_FLOOR)?)
		} else {
			None
		};
		trace!("saving fd {slot} as {saved:?}");
		frame.push(SavedFd { slot, saved });
		Ok(())
	}

	pub fn pop_frame(&mut self) {
		let Some(frame) = self.frames.pop() else {
			return
		};
		for entry in frame.into_iter().rev() {
			match entry.saved {
				Some(mut fd) => {
					if let Err(e) = fd.dup2(&entry.slot) {
						debug!("could not restore fd {}: {e}", entry.slot);
					}
					let _ = fd.close();
				}
				None => close_raw(entry.slot)
			}
		}
	}
}

fn open_err(verb: &str, path: &str, err: io::Error) -> RashErr {
	let errno = err.raw_os_error().map(Errno::from_raw).unwrap_or(Errno::UnknownErrno);
	Low(RashErrLow::Redirect(format!("cannot {verb} {path}: {}", errno.desc())))
}

/// `>` with noclobber: an existing regular file is refused. The check is made before
/// opening and confirmed on the open descriptor in case the file was swapped in between.
fn open_noclobber(path: &str) -> RashResult<RustFd> {
	let exists_regular = |mode: libc::mode_t| SFlag::from_bits_truncate(mode & SFlag::S_IFMT.bits()) == SFlag::S_IFREG;
	if let Ok(st) = stat(path) {
		if exists_regular(st.st_mode) {
			return Err(open_err("create", path, io::Error::from_raw_os_error(libc::EEXIST)))
		}
	}
	match RustFd::open(path, O_WRONLY | O_CREAT | O_EXCL, 0o666) {
		Ok(fd) => Ok(fd),
		Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
			let mut fd = RustFd::open(path, O_WRONLY, 0).map_err(|e| open_err("create", path, e))?;
			let st = fstat(fd.as_raw_fd())?;
			if exists_regular(st.st_mode) {
				fd.close()?;
				return Err(open_err("create", path, io::Error::from_raw_os_error(libc::EEXIST)))
			}
			Ok(fd)
		}
		Err(e) => Err(open_err("create", path, e))
	}
}

/// Make a readable descriptor holding a here-document body. Bodies that fit in
/// the pipe buffer are written straight in; longer ones get a writer process.
fn here_pipe(text: &str) -> RashResult<RustFd> {
	let (r_pipe, mut w_pipe) = RustFd::pipe()?;
	if text.len() <= libc::PIPE_BUF {
		w_pipe.write_all(&encode_str(text))?;
		w_pipe.close()?;
		return Ok(r_pipe)
	}
	match unsafe { fork() } {
		Ok(ForkResult::Child) => {
			let mut r_pipe = r_pipe;
			let _ = r_pipe.close();
			let code = if w_pipe.write_all(&encode_str(text)).is_ok() { 0 } else { 1 };
			unsafe { libc::_exit(code) }
		}
		Ok(ForkResult::Parent { child }) => {
			trace!("here-document writer is {child}");
			w_pipe.close()?;
			Ok(r_pipe)
		}
		Err(e) => Err(RashErr::exec(format!("cannot fork: {}", e.desc())))
	}
}

/// Resolve the descriptor a redirection reads from or writes to.
/// `None` means the slot is to be closed (`>&-`).
fn open_target(rash: &mut Rash, redir: &Redir) -> RashResult<Option<RustFd>> {
	let word = match &redir.target {
		RedirTarget::HereDoc(body) => {
			let Some(body) = body.get() else {
				return Err(RashErr::internal("here-document body was never read"))
			};
			let text = expand::expand_heredoc(rash, body)?;
			return Ok(Some(here_pipe(&text)?))
		}
		RedirTarget::Word(word) => expand::expand_word_to_string(rash, word)?
	};
	let noclobber = rash.meta().has_opt(ShOpts::NOCLOBBER);
	let fd = match redir.op {
		RedirOp::Input => RustFd::open(&word, O_RDONLY, 0).map_err(|e| open_err("open", &word, e))?,
		RedirOp::Output if noclobber => open_noclobber(&word)?,
		RedirOp::Output |
		RedirOp::Clobber => RustFd::open(&word, O_WRONLY | O_CREAT | O_TRUNC, 0o666).map_err(|e| open_err("create", &word, e))?,
		RedirOp::Append => RustFd::open(&word, O_WRONLY | O_CREAT | O_APPEND, 0o666).map_err(|e| open_err("create", &word, e))?,
		RedirOp::ReadWrite => RustFd::open(&word, O_RDWR | O_CREAT, 0o666).map_err(|e| open_err("open", &word, e))?,
		RedirOp::DupIn |
		RedirOp::DupOut => {
			if word == "-" {
				return Ok(None)
			}
			let Ok(src) = word.parse::<RawFd>() else {
				return Err(Low(RashErrLow::Redirect(format!("{word}: Bad fd number"))))
			};
			if !RustFd::is_open(src) {
				return Err(Low(RashErrLow::BadFD(src.to_string())))
			}
			if src == redir.fd {
				return Ok(Some(RustFd::new(src)?))
			}
			// A private copy, so closing it later leaves `src` alone
			return Ok(Some(RustFd::dup_high(src, SAVE_FLOOR)?))
		}
		RedirOp::HereDoc |
		RedirOp::HereDocStrip => return Err(RashErr::internal("here-document without a body"))
	};
	Ok(Some(fd))
}

/// Apply redirections in order. With `save`, the previous occupant of every slot
/// is stashed in the newest frame of the redirection stack so the caller can undo it.
pub fn apply_redirs(rash: &mut Rash, redirs: &[Redir], save: bool) -> RashResult<()> {
	for redir in redirs {
		let slot = redir.fd;
		// Saved first: a closed slot is the lowest free fd, so the open below may land on it
		if save {
			rash.ctx_mut().redirs_mut().save(slot)?;
		}
		let target = open_target(rash, redir)?;
		trace!("redirect fd {slot} {} {:?}", redir.op.as_str(), target);
		match target {
			None => close_raw(slot),
			Some(fd) if fd.as_raw_fd() == slot => {
				// Landed on the slot itself: make sure it survives exec
				unsafe { libc::fcntl(slot, libc::F_SETFD, 0) };
			}
			Some(mut fd) => {
				fd.dup2(&slot)?;
				fd.close()?;
			}
		}
	}
	Ok(())
}

/// Run `f` with redirections in effect, then put every descriptor back.
/// A redirection that fails is reported and the command does not run.
pub fn with_redirs<F>(rash: &mut Rash, redirs: &[Redir], f: F) -> RashResult<()>
where
	F: FnOnce(&mut Rash) -> RashResult<()>
{
	if redirs.is_empty() {
		return f(rash)
	}
	rash.ctx_mut().redirs_mut().push_frame();
	let applied = apply_redirs(rash, redirs, true);
	let result = match applied {
		Ok(()) => f(rash),
		Err(_) => Ok(())
	};
	rash.ctx_mut().redirs_mut().pop_frame();
	if let Err(e) = applied {
		if e.is_control_flow() {
			return Err(e)
		}
		rash.report_err(&e);
		rash.set_code(1);
	}
	result
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn frames_restore_newest_first() {
		let mut stack = RedirStack::default();
		let (mut r, mut w) = RustFd::pipe().unwrap();
		let slot = RustFd::dup_high(w.as_raw_fd(), 20).unwrap();
		let slot_fd = slot.as_raw_fd();

		stack.push_frame();
		stack.save(slot_fd).unwrap();
		// Overwrite the slot with the read end, then undo
		r.dup2(&slot_fd).unwrap();
		stack.pop_frame();

		// The slot writes into the pipe again
		let mut restored = unsafe { RustFd::from_raw_fd(slot_fd) };
		restored.write_all(b"ok").unwrap();
		restored.close().unwrap();
		w.close().unwrap();
		assert_eq!(r.read_text().unwrap(), "ok");
		r.close().unwrap();
		assert_eq!(stack.depth(), 0);
	}

	#[test]
	fn short_heredoc_bodies_need_no_writer() {
		let mut fd = here_pipe("line one\nline two\n").unwrap();
		assert_eq!(fd.read_text().unwrap(), "line one\nline two\n");
		fd.close().unwrap();
	}

	#[test]
	fn long_heredoc_bodies_are_fed_by_a_child() {
		let body = "x".repeat(libc::PIPE_BUF * 4);
		let mut fd = here_pipe(&body).unwrap();
		assert_eq!(fd.read_text().unwrap().len(), body.len());
		fd.close().unwrap();
	}

	#[test]
	fn noclobber_refuses_regular_files() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("out");
		let path = path.to_str().unwrap();
		let mut fd = open_noclobber(path).unwrap();
		fd.close().unwrap();
		let err = open_noclobber(path).unwrap_err();
		assert!(err.to_string().starts_with("cannot create"));
		let mut null = open_noclobber("/dev/null").unwrap();
		null.close().unwrap();
	}
}
