pub use std::{
	collections::{
		HashMap,
		VecDeque
	},
	env,
	ffi::CString,
	fmt::{
		self,
		Display
	},
	io::{
		self,
		Read,
		Write
	},
	os::fd::{
		AsRawFd,
		FromRawFd,
		IntoRawFd,
		RawFd
	}, path::{
		Path,
		PathBuf
	},
	rc::Rc
};

pub use libc::{
	c_void,
	mode_t,
	STDIN_FILENO,
	STDOUT_FILENO,
	STDERR_FILENO,
	O_APPEND,
	O_CREAT,
	O_EXCL,
	O_RDONLY,
	O_RDWR,
	O_TRUNC,
	O_WRONLY
};
pub use nix::{
	errno::Errno,
	sys::{
		signal::Signal,
		wait::WaitStatus
	}, unistd::{
		fork,
		ForkResult,
		Pid
	}
};
pub use bitflags::bitflags;
pub use crate::{
	shellenv::Rash,
	utils::RustFd,
	helper::StrExtension,
	error::{
		RashResult,
		RashErr::*,
		RashErr,
		RashErrLow,
		RashErrHigh
	},
};
