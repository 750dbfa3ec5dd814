use crate::utils::{byte_char, write_out};
use crate::prelude::*;

bitflags! {
	#[derive(Debug,Clone,Copy,PartialEq,Eq)]
	pub struct EchoFlags: u8 {
		const NO_NEWLINE = 0b01;
		/// `\c` was seen, nothing else is printed
		const STOP       = 0b10;
	}
}

/// Interpret backslash escapes the way ash's echo always does
fn unescape(arg: &str, flags: &mut EchoFlags) -> String {
	let mut out = String::with_capacity(arg.len());
	let mut chars = arg.chars().peekable();
	while let Some(ch) = chars.next() {
		if ch != '\\' {
			out.push(ch);
			continue
		}
		match chars.next() {
			Some('a') => out.push('\x07'),
			Some('b') => out.push('\x08'),
			Some('c') => {
				*flags |= EchoFlags::STOP;
				return out
			}
			Some('e') => out.push('\x1b'),
			Some('f') => out.push('\x0c'),
			Some('n') => out.push('\n'),
			Some('r') => out.push('\r'),
			Some('t') => out.push('\t'),
			Some('v') => out.push('\x0b'),
			Some('\\') => out.push('\\'),
			Some('0') => {
				let mut value = 0u32;
				for _ in 0..3 {
					match chars.peek().and_then(|ch| ch.to_digit(8)) {
						Some(digit) => {
							value = value * 8 + digit;
							chars.next();
						}
						None => break
					}
				}
				out.push(byte_char((value & 0xff) as u8));
			}
			Some(other) => {
				out.push('\\');
				out.push(other);
			}
			None => out.push('\\')
		}
	}
	out
}

/// `echo [-n] [arg...]`
pub fn execute(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let mut flags = EchoFlags::empty();
	let mut args = &argv[1..];
	if args.first().is_some_and(|arg| arg == "-n") {
		flags |= EchoFlags::NO_NEWLINE;
		args = &args[1..];
	}

	let mut output = String::new();
	for (i, arg) in args.iter().enumerate() {
		if i > 0 {
			output.push(' ');
		}
		output.push_str(&unescape(arg, &mut flags));
		if flags.contains(EchoFlags::STOP) {
			break
		}
	}
	if !flags.intersects(EchoFlags::NO_NEWLINE | EchoFlags::STOP) {
		output.push('\n');
	}
	write_out(&output)?;
	rash.set_code(0);
	Ok(())
}
