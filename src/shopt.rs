use crate::prelude::*;

bitflags! {
	/// Shell options toggled by `set -x`/`set -o xtrace` and friends
	#[derive(Debug,Clone,Copy,PartialEq,Eq)]
	pub struct ShOpts: u32 {
		const ERREXIT     = 0b0000000001;
		const NOUNSET     = 0b0000000010;
		const XTRACE      = 0b0000000100;
		const VERBOSE     = 0b0000001000;
		const NOEXEC      = 0b0000010000;
		const NOGLOB      = 0b0000100000;
		const NOCLOBBER   = 0b0001000000;
		const MONITOR     = 0b0010000000;
		const ALLEXPORT   = 0b0100000000;
		const INTERACTIVE = 0b1000000000;
	}
}

/// Letter, long name, flag. Ordered the way `set -o` lists them.
const OPT_TABLE: [(char, &str, ShOpts); 10] = [
	('a', "allexport", ShOpts::ALLEXPORT),
	('e', "errexit", ShOpts::ERREXIT),
	('i', "interactive", ShOpts::INTERACTIVE),
	('m', "monitor", ShOpts::MONITOR),
	('C', "noclobber", ShOpts::NOCLOBBER),
	('n', "noexec", ShOpts::NOEXEC),
	('f', "noglob", ShOpts::NOGLOB),
	('u', "nounset", ShOpts::NOUNSET),
	('v', "verbose", ShOpts::VERBOSE),
	('x', "xtrace", ShOpts::XTRACE),
];

impl ShOpts {
	pub fn from_letter(ch: char) -> Option<Self> {
		OPT_TABLE.iter().find(|(letter,_,_)| *letter == ch).map(|(_,_,opt)| *opt)
	}

	pub fn from_long(name: &str) -> Option<Self> {
		OPT_TABLE.iter().find(|(_,long,_)| *long == name).map(|(_,_,opt)| *opt)
	}

	/// The value of `$-`
	pub fn letters(&self) -> String {
		OPT_TABLE.iter()
			.filter(|(_,_,opt)| self.contains(*opt))
			.map(|(letter,_,_)| *letter)
			.collect()
	}

	/// Every option paired with whether it is set, for `set -o` and `set +o`
	pub fn describe(&self) -> Vec<(&'static str, bool)> {
		OPT_TABLE.iter()
			.map(|(_,long,opt)| (*long, self.contains(*opt)))
			.collect()
	}

	/// Options that `set` is allowed to toggle after startup
	pub fn settable(&self) -> bool {
		!self.intersects(ShOpts::INTERACTIVE)
	}

	/// Apply a flag cluster such as `-eux` or `+x`.
	/// Returns the first unknown letter on failure.
	pub fn apply_cluster(&mut self, arg: &str) -> Result<(), char> {
		let (on, letters) = match arg.split_at(1) {
			("-", rest) => (true, rest),
			("+", rest) => (false, rest),
			_ => return Err(arg.chars().next().unwrap_or('?'))
		};
		for ch in letters.chars() {
			let opt = Self::from_letter(ch).ok_or(ch)?;
			self.set(opt, on);
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn letters_are_listed_in_table_order() {
		let opts = ShOpts::XTRACE | ShOpts::ERREXIT | ShOpts::INTERACTIVE;
		assert_eq!(opts.letters(), "eix");
	}

	#[test]
	fn clusters_toggle_options() {
		let mut opts = ShOpts::empty();
		opts.apply_cluster("-eu").unwrap();
		assert!(opts.contains(ShOpts::ERREXIT | ShOpts::NOUNSET));
		opts.apply_cluster("+e").unwrap();
		assert!(!opts.contains(ShOpts::ERREXIT));
		assert_eq!(opts.apply_cluster("-eZ"), Err('Z'));
	}

	#[test]
	fn long_names_resolve() {
		assert_eq!(ShOpts::from_long("noclobber"), Some(ShOpts::NOCLOBBER));
		assert_eq!(ShOpts::from_long("pipefail"), None);
	}
}
