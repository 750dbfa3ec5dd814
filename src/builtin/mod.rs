use crate::prelude::*;

pub mod alias;
pub mod assign;
pub mod cd;
pub mod control;
pub mod echo;
pub mod exec;
pub mod job;
pub mod opts;
pub mod read;
pub mod test;
pub mod trap;
pub mod umask;

#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum BuiltinCmd {
	Colon,
	True,
	False,
	Cd,
	Pwd,
	Echo,
	Test,
	Bracket,
	Exec,
	Exit,
	Export,
	Readonly,
	Local,
	Unset,
	Read,
	Set,
	Shift,
	Trap,
	Umask,
	Wait,
	Jobs,
	Fg,
	Bg,
	Kill,
	Dot,
	Eval,
	Return,
	Break,
	Continue,
	Alias,
	Unalias,
	Command,
	Type,
	Hash,
}

impl BuiltinCmd {
	pub fn lookup(name: &str) -> Option<Self> {
		let cmd = match name {
			":" => Self::Colon,
			"true" => Self::True,
			"false" => Self::False,
			"cd" => Self::Cd,
			"pwd" => Self::Pwd,
			"echo" => Self::Echo,
			"test" => Self::Test,
			"[" => Self::Bracket,
			"exec" => Self::Exec,
			"exit" => Self::Exit,
			"export" => Self::Export,
			"readonly" => Self::Readonly,
			"local" => Self::Local,
			"unset" => Self::Unset,
			"read" => Self::Read,
			"set" => Self::Set,
			"shift" => Self::Shift,
			"trap" => Self::Trap,
			"umask" => Self::Umask,
			"wait" => Self::Wait,
			"jobs" => Self::Jobs,
			"fg" => Self::Fg,
			"bg" => Self::Bg,
			"kill" => Self::Kill,
			"." => Self::Dot,
			"eval" => Self::Eval,
			"return" => Self::Return,
			"break" => Self::Break,
			"continue" => Self::Continue,
			"alias" => Self::Alias,
			"unalias" => Self::Unalias,
			"command" => Self::Command,
			"type" => Self::Type,
			"hash" => Self::Hash,
			_ => return None
		};
		Some(cmd)
	}

	/// Assignments in front of these persist, and their errors end a script
	pub fn is_special(&self) -> bool {
		matches!(self,
			Self::Colon |
			Self::Dot |
			Self::Break |
			Self::Continue |
			Self::Eval |
			Self::Exec |
			Self::Exit |
			Self::Export |
			Self::Readonly |
			Self::Return |
			Self::Set |
			Self::Shift |
			Self::Trap |
			Self::Unset
		)
	}

	/// Run with the arguments already expanded. `argv[0]` is the builtin's own name.
	pub fn run(&self, rash: &mut Rash, argv: &[String]) -> RashResult<()> {
		let result = match self {
			Self::Colon |
			Self::True => {
				rash.set_code(0);
				Ok(())
			}
			Self::False => {
				rash.set_code(1);
				Ok(())
			}
			Self::Cd => cd::execute(argv, rash),
			Self::Pwd => cd::pwd(argv, rash),
			Self::Echo => echo::execute(argv, rash),
			Self::Test |
			Self::Bracket => test::execute(argv, rash),
			Self::Exec => exec::exec(rash, argv, vec![], &[]),
			Self::Exit => control::exit(argv, rash),
			Self::Export => assign::export(argv, rash),
			Self::Readonly => assign::readonly(argv, rash),
			Self::Local => assign::local(argv, rash),
			Self::Unset => assign::unset(argv, rash),
			Self::Read => read::execute(argv, rash),
			Self::Set => opts::set(argv, rash),
			Self::Shift => control::shift(argv, rash),
			Self::Trap => trap::execute(argv, rash),
			Self::Umask => umask::execute(argv, rash),
			Self::Wait => job::wait(argv, rash),
			Self::Jobs => job::jobs(argv, rash),
			Self::Fg => job::continue_job(argv, rash, true),
			Self::Bg => job::continue_job(argv, rash, false),
			Self::Kill => job::kill(argv, rash),
			Self::Dot => control::source(argv, rash),
			Self::Eval => control::eval(argv, rash),
			Self::Return => control::func_return(argv, rash),
			Self::Break => control::loop_break(argv, rash, false),
			Self::Continue => control::loop_break(argv, rash, true),
			Self::Alias => alias::execute(argv, rash),
			Self::Unalias => alias::unalias(argv, rash),
			Self::Command => exec::command(argv, rash),
			Self::Type => exec::type_cmd(argv, rash),
			Self::Hash => exec::hash(argv, rash),
		};

		match result {
			Err(e) if !e.is_control_flow() => {
				let status = e.status();
				rash.report(&format!("{}: {}", argv[0], e.low()));
				rash.set_code(status);
				if self.is_special() && !rash.meta().is_interactive() {
					return Err(Low(RashErrLow::CleanExit(status)))
				}
				Ok(())
			}
			other => other
		}
	}
}

/// Split leading `-abc` option clusters off an argument list. Stops at `--`,
/// at `-` alone, and at the first word that isn't an option.
pub fn take_opts<'a>(argv: &'a [String], allowed: &str) -> RashResult<(Vec<char>, &'a [String])> {
	let mut opts = vec![];
	let mut rest = argv;
	while let Some(arg) = rest.first() {
		if arg == "--" {
			rest = &rest[1..];
			break
		}
		let Some(cluster) = arg.strip_prefix('-').filter(|c| !c.is_empty()) else {
			break
		};
		for ch in cluster.chars() {
			if !allowed.contains(ch) {
				return Err(RashErr::usage(format!("Illegal option -{ch}")))
			}
			opts.push(ch);
		}
		rest = &rest[1..];
	}
	Ok((opts, rest))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn strings(args: &[&str]) -> Vec<String> {
		args.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn lookup_and_special() {
		assert_eq!(BuiltinCmd::lookup("["), Some(BuiltinCmd::Bracket));
		assert_eq!(BuiltinCmd::lookup("ls"), None);
		assert!(BuiltinCmd::Export.is_special());
		assert!(!BuiltinCmd::Cd.is_special());
	}

	#[test]
	fn option_clusters() {
		let args = strings(&["-rp", "--", "-x"]);
		let (opts, rest) = take_opts(&args, "rp").unwrap();
		assert_eq!(opts, vec!['r', 'p']);
		assert_eq!(rest, &["-x".to_string()]);
		assert!(take_opts(&strings(&["-z"]), "rp").is_err());
		let args = strings(&["-", "a"]);
		let (opts, rest) = take_opts(&args, "r").unwrap();
		assert!(opts.is_empty());
		assert_eq!(rest.len(), 2);
	}
}
