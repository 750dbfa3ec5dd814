use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt};

use nix::unistd::{access, AccessFlags};

use crate::utils::to_path;
use crate::prelude::*;

const UNARY_OPS: [&str;19] = [
	"-b", "-c", "-d", "-e", "-f", "-g", "-h", "-k", "-L", "-n",
	"-p", "-r", "-s", "-S", "-t", "-u", "-w", "-x", "-z"
];
const BINARY_OPS: [&str;11] = ["=", "!=", "-eq", "-ne", "-gt", "-ge", "-lt", "-le", "-nt", "-ot", "-ef"];

fn to_int(arg: &str) -> RashResult<i64> {
	arg.trim().parse::<i64>().map_err(|_| RashErr::usage(format!("Illegal number: {arg}")))
}

/// Apply a property check to a file's metadata. A missing file fails the test.
fn run_test<F>(path: &str, follow: bool, check: F) -> bool
where F: FnOnce(&fs::Metadata) -> bool {
	let path = to_path(path);
	let meta = if follow { fs::metadata(&path) } else { fs::symlink_metadata(&path) };
	meta.is_ok_and(|meta| check(&meta))
}

fn do_cmp<F>(lhs: &str, rhs: &str, cmp: F) -> bool
where F: FnOnce(&fs::Metadata, &fs::Metadata) -> bool {
	match (fs::metadata(to_path(lhs)), fs::metadata(to_path(rhs))) {
		(Ok(lhs), Ok(rhs)) => cmp(&lhs, &rhs),
		_ => false
	}
}

fn unary(op: &str, arg: &str) -> RashResult<bool> {
	let result = match op {
		"-n" => !arg.is_empty(),
		"-z" => arg.is_empty(),
		"-b" => run_test(arg, true, |meta| meta.file_type().is_block_device()),
		"-c" => run_test(arg, true, |meta| meta.file_type().is_char_device()),
		"-d" => run_test(arg, true, |meta| meta.is_dir()),
		"-e" => run_test(arg, true, |_| true),
		"-f" => run_test(arg, true, |meta| meta.is_file()),
		"-g" => run_test(arg, true, |meta| meta.mode() & 0o2000 != 0),
		"-k" => run_test(arg, true, |meta| meta.mode() & 0o1000 != 0),
		"-u" => run_test(arg, true, |meta| meta.mode() & 0o4000 != 0),
		"-h" | "-L" => run_test(arg, false, |meta| meta.file_type().is_symlink()),
		"-p" => run_test(arg, true, |meta| meta.file_type().is_fifo()),
		"-S" => run_test(arg, true, |meta| meta.file_type().is_socket()),
		"-s" => run_test(arg, true, |meta| meta.len() > 0),
		"-r" => access(&to_path(arg), AccessFlags::R_OK).is_ok(),
		"-w" => access(&to_path(arg), AccessFlags::W_OK).is_ok(),
		"-x" => access(&to_path(arg), AccessFlags::X_OK).is_ok(),
		"-t" => {
			let fd = to_int(arg)?;
			RawFd::try_from(fd).is_ok_and(|fd| unsafe { libc::isatty(fd) == 1 })
		}
		_ => return Err(RashErr::usage(format!("{op}: unexpected operator")))
	};
	Ok(result)
}

fn binary(lhs: &str, op: &str, rhs: &str) -> RashResult<bool> {
	let result = match op {
		"=" => lhs == rhs,
		"!=" => lhs != rhs,
		"-eq" => to_int(lhs)? == to_int(rhs)?,
		"-ne" => to_int(lhs)? != to_int(rhs)?,
		"-gt" => to_int(lhs)? > to_int(rhs)?,
		"-ge" => to_int(lhs)? >= to_int(rhs)?,
		"-lt" => to_int(lhs)? < to_int(rhs)?,
		"-le" => to_int(lhs)? <= to_int(rhs)?,
		"-nt" => match (fs::metadata(to_path(lhs)), fs::metadata(to_path(rhs))) {
			(Ok(lhs), Ok(rhs)) => lhs.mtime() > rhs.mtime() || (lhs.mtime() == rhs.mtime() && lhs.mtime_nsec() > rhs.mtime_nsec()),
			(Ok(_), Err(_)) => true,
			_ => false
		}
		"-ot" => match (fs::metadata(to_path(lhs)), fs::metadata(to_path(rhs))) {
			(Ok(lhs), Ok(rhs)) => lhs.mtime() < rhs.mtime() || (lhs.mtime() == rhs.mtime() && lhs.mtime_nsec() < rhs.mtime_nsec()),
			(Err(_), Ok(_)) => true,
			_ => false
		}
		"-ef" => do_cmp(lhs, rhs, |lhs, rhs| lhs.dev() == rhs.dev() && lhs.ino() == rhs.ino()),
		_ => return Err(RashErr::usage(format!("{op}: unexpected operator")))
	};
	Ok(result)
}

/// Recursive descent over the operands. `-o` binds looser than `-a`, which
/// binds looser than `!`.
struct TestParser<'a> {
	args: &'a [String],
	pos: usize
}

impl<'a> TestParser<'a> {
	fn new(args: &'a [String]) -> Self {
		Self { args, pos: 0 }
	}
	fn peek(&self, offset: usize) -> Option<&'a str> {
		self.args.get(self.pos + offset).map(|arg| arg.as_str())
	}
	fn remaining(&self) -> usize {
		self.args.len() - self.pos
	}
	fn next(&mut self) -> RashResult<&'a str> {
		let arg = self.peek(0).ok_or_else(|| RashErr::usage("argument expected"))?;
		self.pos += 1;
		Ok(arg)
	}
	fn or_expr(&mut self) -> RashResult<bool> {
		let mut result = self.and_expr()?;
		while self.peek(0) == Some("-o") {
			self.pos += 1;
			let rhs = self.and_expr()?;
			result = result || rhs;
		}
		Ok(result)
	}
	fn and_expr(&mut self) -> RashResult<bool> {
		let mut result = self.not_expr()?;
		while self.peek(0) == Some("-a") {
			self.pos += 1;
			let rhs = self.not_expr()?;
			result = result && rhs;
		}
		Ok(result)
	}
	fn not_expr(&mut self) -> RashResult<bool> {
		// `! = x` compares the string "!"
		if self.peek(0) == Some("!") && !self.peek(1).is_some_and(|op| BINARY_OPS.contains(&op)) {
			self.pos += 1;
			return Ok(!self.not_expr()?)
		}
		self.primary()
	}
	fn primary(&mut self) -> RashResult<bool> {
		if self.remaining() >= 3 && self.peek(1).is_some_and(|op| BINARY_OPS.contains(&op)) {
			let lhs = self.next()?;
			let op = self.next()?;
			let rhs = self.next()?;
			return binary(lhs, op, rhs)
		}
		let arg = self.next()?;
		if arg == "(" && self.remaining() > 0 {
			let result = self.or_expr()?;
			if self.next()? != ")" {
				return Err(RashErr::usage("closing paren expected"))
			}
			return Ok(result)
		}
		if UNARY_OPS.contains(&arg) && self.remaining() > 0 {
			let operand = self.next()?;
			return unary(arg, operand)
		}
		Ok(!arg.is_empty())
	}
}

/// Evaluate a test expression. `Err` carries a usage error, which the caller
/// turns into status 2.
pub fn evaluate(args: &[String]) -> RashResult<bool> {
	match args.len() {
		0 => return Ok(false),
		1 => return Ok(!args[0].is_empty()),
		2 if args[0] == "!" => return Ok(args[1].is_empty()),
		_ => {}
	}
	let mut parser = TestParser::new(args);
	let result = parser.or_expr()?;
	if let Some(extra) = parser.peek(0) {
		return Err(RashErr::usage(format!("{extra}: unexpected operator")))
	}
	Ok(result)
}

/// `test expr` and `[ expr ]`
pub fn execute(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let mut args = &argv[1..];
	if argv[0] == "[" {
		match args.split_last() {
			Some((last, rest)) if last == "]" => args = rest,
			_ => return Err(RashErr::usage("missing ]"))
		}
	}
	let result = evaluate(args)?;
	rash.set_code(if result { 0 } else { 1 });
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn words(src: &str) -> Vec<String> {
		src.split_whitespace().map(String::from).collect()
	}

	#[test]
	fn strings_and_numbers() {
		assert!(evaluate(&words("abc = abc")).unwrap());
		assert!(evaluate(&words("abc != abd")).unwrap());
		assert!(evaluate(&words("10 -gt 9")).unwrap());
		assert!(evaluate(&words("-n")).unwrap());
		assert!(evaluate(&words("-n x")).unwrap());
		assert!(!evaluate(&words("-z x")).unwrap());
		assert!(evaluate(&words("x -lt 1")).is_err());
		assert!(!evaluate(&[]).unwrap());
	}

	#[test]
	fn connectives() {
		assert!(evaluate(&words("! a = b")).unwrap());
		assert!(evaluate(&words("a = b -o c = c")).unwrap());
		assert!(!evaluate(&words("a = a -a c = d")).unwrap());
		assert!(evaluate(&words("( a = b -o b = b ) -a x")).unwrap());
		assert!(evaluate(&words("! = !")).unwrap());
	}

	#[test]
	fn files() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("f");
		fs::write(&file, "data").unwrap();
		let dir_s = dir.path().display().to_string();
		let file_s = file.display().to_string();
		assert!(evaluate(&["-d".into(), dir_s.clone()]).unwrap());
		assert!(evaluate(&["-f".into(), file_s.clone()]).unwrap());
		assert!(evaluate(&["-s".into(), file_s.clone()]).unwrap());
		assert!(!evaluate(&["-e".into(), format!("{dir_s}/missing")]).unwrap());
		assert!(evaluate(&[file_s.clone(), "-ef".into(), file_s]).unwrap());
	}

	#[test]
	fn bracket_needs_closing() {
		let mut rash = Rash::new();
		crate::interpret::eval_string(&mut rash, "[ a = a ]; x=$?; [ a = a 2>/dev/null; y=$?").unwrap();
		assert_eq!(rash.get_var("x"), Some("0"));
		assert_eq!(rash.get_var("y"), Some("2"));
	}
}
