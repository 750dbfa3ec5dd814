use nix::sys::stat::{umask, Mode};

use crate::builtin::take_opts;
use crate::utils::write_out;
use crate::prelude::*;

fn current() -> u32 {
	let old = umask(Mode::empty());
	umask(old);
	old.bits() as u32
}

/// `u=rwx,g=rx,o=rx` for the permissions a mask leaves open
fn symbolic(mask: u32) -> String {
	let allowed = !mask & 0o777;
	["u", "g", "o"].iter().enumerate().map(|(i, who)| {
		let bits = (allowed >> (6 - i * 3)) & 0o7;
		let mut perms = String::new();
		if bits & 0o4 != 0 { perms.push('r') }
		if bits & 0o2 != 0 { perms.push('w') }
		if bits & 0o1 != 0 { perms.push('x') }
		format!("{who}={perms}")
	}).collect::<Vec<_>>().join(",")
}

/// Apply a chmod-style clause list (`u+w,go-rx`, `a=r`) to the allowed permission bits
fn apply_symbolic(spec: &str, mask: u32) -> Option<u32> {
	let mut allowed = !mask & 0o777;
	for clause in spec.split(',') {
		let op_pos = clause.find(['+', '-', '='])?;
		let (who, rest) = clause.split_at(op_pos);
		let mut who_bits = 0;
		for ch in who.chars() {
			who_bits |= match ch {
				'u' => 0o700,
				'g' => 0o070,
				'o' => 0o007,
				'a' => 0o777,
				_ => return None
			};
		}
		if who_bits == 0 {
			who_bits = 0o777;
		}
		let mut chars = rest.chars().peekable();
		while let Some(op) = chars.next() {
			let mut perm = 0;
			while let Some(ch) = chars.peek().copied() {
				perm |= match ch {
					'r' => 0o444,
					'w' => 0o222,
					'x' => 0o111,
					'+' | '-' | '=' => break,
					_ => return None
				};
				chars.next();
			}
			let bits = perm & who_bits;
			match op {
				'+' => allowed |= bits,
				'-' => allowed &= !bits,
				'=' => allowed = (allowed & !who_bits) | bits,
				_ => return None
			}
		}
	}
	Some(!allowed & 0o777)
}

/// `umask [-S] [mask]`
pub fn execute(argv: &[String], rash: &mut Rash) -> RashResult<()> {
	let (opts, args) = take_opts(&argv[1..], "S")?;
	let mask = current();
	let Some(spec) = args.first() else {
		if opts.contains(&'S') {
			write_out(&format!("{}\n", symbolic(mask)))?;
		} else {
			write_out(&format!("{mask:04o}\n"))?;
		}
		rash.set_code(0);
		return Ok(())
	};

	let new_mask = if spec.chars().all(|ch| ch.is_digit(8)) {
		u32::from_str_radix(spec, 8).ok().filter(|mask| *mask <= 0o777)
	} else {
		apply_symbolic(spec, mask)
	};
	let Some(new_mask) = new_mask else {
		return Err(RashErr::usage(format!("Illegal mode: {spec}")))
	};
	umask(Mode::from_bits_truncate(new_mask as mode_t));
	rash.set_code(0);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn symbolic_forms() {
		assert_eq!(symbolic(0o022), "u=rwx,g=rx,o=rx");
		assert_eq!(symbolic(0o077), "u=rwx,g=,o=");
		assert_eq!(apply_symbolic("g+w", 0o022), Some(0o002));
		assert_eq!(apply_symbolic("a=r,u+w", 0o000), Some(0o133));
		assert_eq!(apply_symbolic("o-rwx", 0o022), Some(0o027));
		assert_eq!(apply_symbolic("z+r", 0o022), None);
	}
}
