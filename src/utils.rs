use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};

use nix::unistd::{access, execve, AccessFlags};

use crate::prelude::*;

/// Input bytes that are not UTF-8 travel through the shell as chars in this
/// private-use block, one per byte, and become the same byte again on output.
const RAW_BYTE_BASE: u32 = 0xF700;

/// Turn bytes from a file, pipe or the environment into shell text without loss
pub fn decode_bytes(mut bytes: &[u8]) -> String {
	let mut text = String::with_capacity(bytes.len());
	loop {
		match std::str::from_utf8(bytes) {
			Ok(valid) => {
				text.push_str(valid);
				return text
			}
			Err(e) => {
				let (valid, rest) = bytes.split_at(e.valid_up_to());
				// Checked by from_utf8 above
				text.push_str(unsafe { std::str::from_utf8_unchecked(valid) });
				let bad = e.error_len().unwrap_or(rest.len());
				for byte in &rest[..bad] {
					text.extend(char::from_u32(RAW_BYTE_BASE + *byte as u32));
				}
				bytes = &rest[bad..];
			}
		}
	}
}

/// The char that stands for one byte of output
pub fn byte_char(byte: u8) -> char {
	if byte.is_ascii() {
		byte as char
	} else {
		char::from_u32(RAW_BYTE_BASE + byte as u32).unwrap_or(char::REPLACEMENT_CHARACTER)
	}
}

/// The bytes shell text stands for, undoing `decode_bytes`
pub fn encode_str(text: &str) -> Vec<u8> {
	let mut bytes = Vec::with_capacity(text.len());
	for ch in text.chars() {
		let code = ch as u32;
		if (RAW_BYTE_BASE..RAW_BYTE_BASE + 0x100).contains(&code) {
			bytes.push((code - RAW_BYTE_BASE) as u8);
		} else {
			let mut buf = [0u8; 4];
			bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
		}
	}
	bytes
}

pub fn decode_os(text: &OsStr) -> String {
	decode_bytes(text.as_bytes())
}

/// A filesystem path named by shell text
pub fn to_path(text: &str) -> PathBuf {
	PathBuf::from(OsString::from_vec(encode_str(text)))
}

/// Shell text as a C string for the kernel. NUL bytes cannot be passed and are dropped.
pub fn to_cstring(text: &str) -> CString {
	let mut bytes = encode_str(text);
	bytes.retain(|byte| *byte != 0);
	CString::new(bytes).unwrap_or_default()
}

/// A thin wrapper over a raw file descriptor.
/// Nothing is closed on drop; ownership is tracked by whoever holds the value.
#[derive(Hash, Eq, PartialEq, Debug)]
pub struct RustFd {
	fd: RawFd,
}

impl fmt::Write for RustFd {
	fn write_str(&mut self, s: &str) -> std::fmt::Result {
		io::Write::write_all(self, &encode_str(s)).map_err(|_| fmt::Error)
	}
}

impl io::Write for RustFd {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		if !self.is_valid() {
			return Err(io::Error::new(io::ErrorKind::Other, "Invalid RustFd"))
		}

		loop {
			let result = unsafe { libc::write(self.fd, buf.as_ptr() as *const c_void, buf.len()) };
			if result < 0 {
				let err = io::Error::last_os_error();
				if err.raw_os_error() == Some(libc::EINTR) {
					continue
				}
				return Err(err)
			}
			return Ok(result as usize)
		}
	}
	fn flush(&mut self) -> std::io::Result<()> {
		Ok(())
	}
}

impl io::Read for RustFd {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		if !self.is_valid() {
			return Err(io::Error::new(io::ErrorKind::Other, "Invalid RustFd"));
		}

		loop {
			let result = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
			if result < 0 {
				let err = io::Error::last_os_error();
				if err.raw_os_error() == Some(libc::EINTR) {
					continue
				}
				return Err(err)
			}
			return Ok(result as usize)
		}
	}
}

impl RustFd {
	pub fn new(fd: RawFd) -> io::Result<Self> {
		if fd < 0 {
			return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("{fd}: invalid file descriptor")))
		}
		Ok(RustFd { fd })
	}

	/// Produces a read end and a write end. Both are close-on-exec until dup2'd into place.
	pub fn pipe() -> io::Result<(Self,Self)> {
		let mut fds = [0;2];
		let result = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };

		if result == -1 {
			return Err(io::Error::last_os_error())
		}
		Ok((RustFd { fd: fds[0] }, RustFd { fd: fds[1] }))
	}

	pub fn dup(&self) -> io::Result<Self> {
		if !self.is_valid() {
			return Err(io::Error::new(io::ErrorKind::Other, "Invalid RustFd"));
		}
		let duped = unsafe { libc::dup(self.fd) };
		if duped < 0 {
			return Err(io::Error::last_os_error())
		}
		Ok(RustFd { fd: duped })
	}

	/// Copy `fd` somewhere at or above `floor`, marked close-on-exec.
	/// Used to stash descriptors that a redirection is about to clobber.
	pub fn dup_high(fd: RawFd, floor: RawFd) -> io::Result<Self> {
		let duped = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, floor) };
		if duped < 0 {
			return Err(io::Error::last_os_error())
		}
		Ok(RustFd { fd: duped })
	}

	/// 'self' is duplicated onto the given target file descriptor.
	pub fn dup2<T: AsRawFd>(&self, target: &T) -> io::Result<()> {
		let target_fd = target.as_raw_fd();
		if self.fd == target_fd {
			// Nothing to do here
			return Ok(())
		}
		if !self.is_valid() || target_fd < 0 {
			return Err(io::Error::new(io::ErrorKind::Other, "Invalid RustFd"));
		}

		loop {
			let result = unsafe { libc::dup2(self.fd, target_fd) };
			if result < 0 {
				let err = io::Error::last_os_error();
				if err.raw_os_error() == Some(libc::EINTR) {
					continue
				}
				return Err(err)
			}
			return Ok(())
		}
	}

	/// Open a file with the given open(2) flags and creation mode
	pub fn open(path: &str, flags: i32, mode: mode_t) -> io::Result<Self> {
		let c_path = CString::new(encode_str(path))
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("Invalid path: {}", e)))?;
		let file_fd = unsafe { libc::open(c_path.as_ptr(), flags | libc::O_CLOEXEC, mode as libc::c_uint) };
		if file_fd < 0 {
			return Err(io::Error::last_os_error())
		}
		Ok(RustFd { fd: file_fd })
	}

	pub fn close(&mut self) -> io::Result<()> {
		if !self.is_valid() {
			return Ok(())
		}

		let result = unsafe { libc::close(self.fd) };
		self.fd = -1;
		if result < 0 {
			Err(io::Error::last_os_error())
		} else {
			Ok(())
		}
	}

	pub fn is_valid(&self) -> bool {
		self.fd >= 0
	}

	/// Whether `fd` refers to an open file description
	pub fn is_open(fd: RawFd) -> bool {
		unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
	}

	pub fn is_tty(&self) -> bool {
		unsafe { libc::isatty(self.fd) == 1 }
	}

	/// Everything left on the descriptor, as shell text
	pub fn read_text(&mut self) -> io::Result<String> {
		let mut buf = vec![];
		self.read_to_end(&mut buf)?;
		Ok(decode_bytes(&buf))
	}
}

impl Display for RustFd {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.fd)
	}
}

impl AsRawFd for RustFd {
	fn as_raw_fd(&self) -> RawFd {
		self.fd
	}
}

impl IntoRawFd for RustFd {
	fn into_raw_fd(self) -> RawFd {
		self.fd
	}
}

impl FromRawFd for RustFd {
	unsafe fn from_raw_fd(fd: RawFd) -> Self {
		RustFd { fd }
	}
}

/// Close a raw descriptor, ignoring EBADF
pub fn close_raw(fd: RawFd) {
	unsafe { libc::close(fd) };
}

/// Write straight to a descriptor without going through std's buffers.
/// Builtin output must land before any child the shell forks next.
pub fn write_fd(fd: RawFd, text: &str) -> io::Result<()> {
	let mut out = RustFd::new(fd)?;
	out.write_all(&encode_str(text))
}

pub fn write_out(text: &str) -> io::Result<()> {
	write_fd(STDOUT_FILENO, text)
}

pub fn write_err(text: &str) -> io::Result<()> {
	write_fd(STDERR_FILENO, text)
}

#[derive(Debug,Clone,PartialEq)]
pub enum PathLookup {
	Found(PathBuf),
	NotExecutable(PathBuf),
	NotFound
}

pub fn is_exec(path: &Path) -> bool {
	path.is_file() && access(path, AccessFlags::X_OK).is_ok()
}

/// Search a colon separated PATH for an executable regular file.
/// Empty entries mean the current directory.
pub fn find_in_path(name: &str, path_var: &str) -> PathLookup {
	let mut fallback = None;
	for dir in path_var.split(':') {
		let dir = if dir.is_empty() { "." } else { dir };
		let candidate = to_path(dir).join(to_path(name));
		if is_exec(&candidate) {
			return PathLookup::Found(candidate)
		}
		if fallback.is_none() && candidate.is_file() {
			fallback = Some(candidate);
		}
	}
	match fallback {
		Some(path) => PathLookup::NotExecutable(path),
		None => PathLookup::NotFound
	}
}

fn to_cstrings<S: AsRef<str>>(strings: &[S]) -> Vec<CString> {
	strings.iter()
		.map(|s| to_cstring(s.as_ref()))
		.collect()
}

/// Replace the current process image. Never returns; failures exit with 126 or 127.
/// A file that the kernel refuses as ENOEXEC is handed to a fresh copy of this shell as a script.
/// `blame` prefixes diagnostics, as in `rash: 3`.
pub fn exec_external(path: &Path, argv: &[String], envp: Vec<CString>, shell_name: &str, blame: &str) -> ! {
	let c_path = CString::new(path.as_os_str().as_bytes()).unwrap_or_default();
	let c_argv = to_cstrings(argv);
	let err = match execve(&c_path, &c_argv, &envp) {
		Ok(_) => unreachable!(),
		Err(e) => e
	};
	let cmd_name = argv.first().map(|s| s.as_str()).unwrap_or_default();
	match err {
		Errno::ENOEXEC => {
			if let Ok(shell) = std::env::current_exe() {
				let mut script_argv = vec![shell_name.to_string(), decode_os(path.as_os_str())];
				script_argv.extend(argv.iter().skip(1).cloned());
				let c_shell = CString::new(shell.as_os_str().as_bytes()).unwrap_or_default();
				let _ = execve(&c_shell, &to_cstrings(&script_argv), &envp);
			}
			let _ = write_err(&format!("{blame}: {cmd_name}: cannot execute\n"));
			std::process::exit(126)
		}
		Errno::ENOENT | Errno::ENOTDIR => {
			let _ = write_err(&format!("{blame}: {cmd_name}: not found\n"));
			std::process::exit(127)
		}
		Errno::EACCES => {
			let _ = write_err(&format!("{blame}: {cmd_name}: Permission denied\n"));
			std::process::exit(126)
		}
		e => {
			let _ = write_err(&format!("{blame}: {cmd_name}: {}\n", e.desc()));
			std::process::exit(126)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::os::unix::fs::PermissionsExt;

	#[test]
	fn pipe_round_trip() {
		let (mut r, mut w) = RustFd::pipe().unwrap();
		w.write_all(b"hello").unwrap();
		w.close().unwrap();
		assert_eq!(r.read_text().unwrap(), "hello");
		r.close().unwrap();
	}

	#[test]
	fn raw_bytes_survive() {
		let bytes = b"ok \xff\xfe caf\xc3\xa9 \xc3";
		let text = decode_bytes(bytes);
		assert!(text.starts_with("ok "));
		assert!(text.contains("café"));
		assert_eq!(encode_str(&text), bytes.to_vec());
		assert_eq!(to_cstring(&text).as_bytes(), bytes);
		assert_eq!(to_path(&text).as_os_str().as_bytes(), bytes);
	}

	#[test]
	fn path_search_prefers_executables() {
		let dir = tempfile::tempdir().unwrap();
		let first = dir.path().join("a");
		let second = dir.path().join("b");
		std::fs::create_dir(&first).unwrap();
		std::fs::create_dir(&second).unwrap();

		let plain = first.join("tool");
		std::fs::write(&plain, "").unwrap();
		let exec = second.join("tool");
		std::fs::write(&exec, "").unwrap();
		std::fs::set_permissions(&exec, std::fs::Permissions::from_mode(0o755)).unwrap();

		let path_var = format!("{}:{}", first.display(), second.display());
		assert_eq!(find_in_path("tool", &path_var), PathLookup::Found(exec));

		let only_plain = first.display().to_string();
		assert_eq!(find_in_path("tool", &only_plain), PathLookup::NotExecutable(plain));
		assert_eq!(find_in_path("nope", &only_plain), PathLookup::NotFound);
	}
}
