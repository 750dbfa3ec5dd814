use log::trace;

use crate::builtin::take_opts;
use crate::signal;
use crate::utils::{decode_bytes, write_err};
use crate::prelude::*;

/// One input byte, and whether a backslash protected it from field splitting
type InputByte = (u8, bool);

/// Read a line from stdin one byte at a time so nothing past the newline is consumed.
/// Returns the bytes and whether input ended before a newline.
fn read_line(raw: bool) -> RashResult<(Vec<InputByte>, bool)> {
	let mut line = vec![];
	let mut escaped = false;
	loop {
		let mut byte = [0u8];
		let count = unsafe { libc::read(STDIN_FILENO, byte.as_mut_ptr() as *mut c_void, 1) };
		if count < 0 {
			let errno = Errno::last();
			if errno == Errno::EINTR {
				if signal::peek_pending().is_some() {
					return Err(Low(RashErrLow::ErrNo(errno)))
				}
				continue
			}
			return Err(Low(RashErrLow::ErrNo(errno)))
		}
		if count == 0 {
			return Ok((line, true))
		}
		let byte = byte[0];
		if escaped {
			escaped = false;
			// backslash-newline continues the line
			if byte != b'\n' {
				line.push((byte, true));
			}
			continue
		}
		match byte {
			b'\n' => return Ok((line, false)),
			b'\\' if !raw => escaped = true,
			_ => line.push((byte, false))
		}
	}
}

fn is_ifs(byte: &InputByte, ifs: &[u8]) -> bool {
	!byte.1 && ifs.contains(&byte.0)
}

fn is_ifs_space(byte: &InputByte, ifs: &[u8]) -> bool {
	is_ifs(byte, ifs) && byte.0.is_ascii_whitespace()
}

fn to_string(bytes: &[InputByte]) -> String {
	let raw: Vec<u8> = bytes.iter().map(|(byte, _)| *byte).collect();
	decode_bytes(&raw)
}

/// Split `line` into at most `count` fields. The last field keeps the rest of
/// the line, minus trailing IFS whitespace.
pub fn split_fields(line: &[InputByte], ifs: &[u8], count: usize) -> Vec<String> {
	let mut fields = vec![];
	let mut pos = 0;
	while pos < line.len() && is_ifs_space(&line[pos], ifs) {
		pos += 1;
	}
	while fields.len() + 1 < count && pos < line.len() {
		let start = pos;
		while pos < line.len() && !is_ifs(&line[pos], ifs) {
			pos += 1;
		}
		fields.push(to_string(&line[start..pos]));
		while pos < line.len() && is_ifs_space(&line[pos], ifs) {
			pos += 1;
		}
		if pos < line.len() && is_ifs(&line[pos], ifs) {
			pos += 1;
			while pos < line.len() && is_ifs_space(&line[pos], ifs) {
				pos += 1;
			}
		}
	}
	// Input that ran out before the names did leaves no trailing empty field
	if fields.len() < count && (pos < line.len() || fields.is_empty()) {
		let mut end = line.len();
		while end > pos && is_ifs_space(&line[end - 1], ifs) {
			end -= 1;
		}
		fields.push(to_string(&line[pos..end]));
	}
	fields
}

/// `read [-r] [-p prompt] [name...]`
pub fn execute(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let mut raw = false;
	let mut prompt = None;
	let mut args = &argv[1..];
	loop {
		let (opts, rest) = take_opts(args, "rp")?;
		raw |= opts.contains(&'r');
		args = rest;
		if opts.last() == Some(&'p') {
			let Some((text, rest)) = args.split_first() else {
				return Err(RashErr::usage("-p: option requires an argument"))
			};
			prompt = Some(text.clone());
			args = rest;
			continue
		}
		break
	}
	let names: Vec<String> = if args.is_empty() { vec!["REPLY".into()] } else { args.to_vec() };
	if let Some(bad) = names.iter().find(|name| !name.is_valid_name()) {
		return Err(RashErr::exec(format!("{bad}: bad variable name")))
	}

	if let Some(prompt) = prompt {
		if unsafe { libc::isatty(STDIN_FILENO) == 1 } {
			write_err(&prompt)?;
		}
	}

	let (line, eof) = match read_line(raw) {
		Ok(read) => read,
		Err(e) if matches!(e.low(), RashErrLow::ErrNo(Errno::EINTR)) => {
			let sig = signal::peek_pending().unwrap_or(libc::SIGINT);
			rash.set_code(128 + sig);
			return Ok(())
		}
		Err(e) => return Err(e)
	};
	trace!("read {} bytes, eof: {eof}", line.len());

	let ifs = rash.get_var("IFS").unwrap_or(" \t\n").as_bytes().to_vec();
	let mut fields = split_fields(&line, &ifs, names.len()).into_iter();
	for name in &names {
		let value = fields.next().unwrap_or_default();
		rash.set_var(name, &value)?;
	}
	rash.set_code(if eof { 1 } else { 0 });
	Ok(())
}
