use clap::{Arg, ArgAction, ArgMatches, Command};
use log::{debug, info};

use rash::expand::expand_word_to_string;
use rash::interp::token::Lexer;
use rash::interpret::{eval_string, InputMode};
use rash::shopt::ShOpts;
use rash::prelude::*;

/// Single letter options that map straight onto a shell option
const OPT_FLAGS: [(char, &str); 9] = [
	('a', "allexport"),
	('e', "errexit"),
	('u', "nounset"),
	('v', "verbose"),
	('x', "xtrace"),
	('C', "noclobber"),
	('f', "noglob"),
	('m', "monitor"),
	('n', "noexec"),
];

fn cli() -> Command {
	let mut cmd = Command::new("rash")
		.about("A POSIX shell in the ash tradition")
		.disable_version_flag(true)
		.arg(Arg::new("command").short('c').action(ArgAction::SetTrue)
			.help("Read commands from the first operand"))
		.arg(Arg::new("stdin").short('s').action(ArgAction::SetTrue)
			.help("Read commands from standard input"))
		.arg(Arg::new("interactive").short('i').action(ArgAction::SetTrue))
		.arg(Arg::new("login").short('l').action(ArgAction::SetTrue))
		.arg(Arg::new("option").short('o').action(ArgAction::Append).value_name("NAME")
			.help("Set an option by its long name"));
	for (letter, name) in OPT_FLAGS {
		cmd = cmd.arg(Arg::new(name).short(letter).action(ArgAction::SetTrue));
	}
	cmd.arg(Arg::new("args")
		.num_args(0..)
		.trailing_var_arg(true)
		.allow_hyphen_values(true))
}

/// clap has no notion of `+x`, so leading `+letters` clusters are taken out first.
/// Returns the letters to switch off and the remaining arguments.
fn take_plus_opts(argv: Vec<String>) -> (Vec<char>, Vec<String>) {
	let mut off = vec![];
	let mut rest = vec![];
	let mut in_opts = true;
	for (i, arg) in argv.into_iter().enumerate() {
		if i > 0 && in_opts && arg.len() > 1 && arg.starts_with('+') {
			off.extend(arg[1..].chars());
			continue
		}
		if i > 0 && !arg.starts_with('-') {
			in_opts = false;
		}
		rest.push(arg);
	}
	(off, rest)
}

fn fail(msg: &str, code: i32) -> ! {
	eprintln!("rash: {msg}");
	std::process::exit(code)
}

fn startup_opts(matches: &ArgMatches, off: &[char]) -> ShOpts {
	let mut opts = ShOpts::empty();
	for (letter, name) in OPT_FLAGS {
		if matches.get_flag(name) {
			opts |= ShOpts::from_letter(letter).unwrap_or(ShOpts::empty());
		}
	}
	for name in matches.get_many::<String>("option").into_iter().flatten() {
		match ShOpts::from_long(name) {
			Some(opt) => opts |= opt,
			None => fail(&format!("Illegal option -o {name}"), 2)
		}
	}
	for letter in off {
		match ShOpts::from_letter(*letter) {
			Some(opt) => opts.remove(opt),
			None => fail(&format!("Illegal option +{letter}"), 2)
		}
	}
	opts
}

/// Run a startup file if it exists. `exit` inside one ends the shell.
fn source_startup(rash: &mut Rash, path: &str) {
	let Ok(bytes) = std::fs::read(rash::utils::to_path(path)) else {
		debug!("no startup file at {path}");
		return
	};
	info!("sourcing startup file {path}");
	let text = rash::utils::decode_bytes(&bytes);
	if let Err(e) = eval_string(rash, &text) {
		match e.low() {
			RashErrLow::CleanExit(code) => rash.exit_shell(*code),
			RashErrLow::FuncReturn(code) => rash.set_code(*code),
			_ => rash.report_err(&e)
		}
	}
}

/// `$ENV` gets parameter expansion before it names a file
fn env_file(rash: &mut Rash) -> Option<String> {
	let raw = rash.get_var("ENV")?.to_string();
	let mut lexer = Lexer::from_str(&raw, 1, HashMap::new());
	let tk = lexer.next_token().ok()?;
	let word = tk.word()?;
	expand_word_to_string(rash, word).ok().filter(|path| !path.is_empty())
}

fn main() {
	env_logger::init();
	// Rust starts with SIGPIPE ignored, which children would inherit
	unsafe { libc::signal(libc::SIGPIPE, libc::SIG_DFL) };

	let argv: Vec<String> = env::args().collect();
	let argv0 = argv.first().cloned().unwrap_or_else(|| "rash".into());
	let (off, argv) = take_plus_opts(argv);
	let matches = match cli().try_get_matches_from(argv) {
		Ok(matches) => matches,
		Err(e) if matches!(e.kind(), clap::error::ErrorKind::DisplayHelp) => e.exit(),
		Err(e) => {
			let msg = e.to_string();
			fail(msg.lines().next().unwrap_or_default().trim_start_matches("error: "), 2)
		}
	};
	let mut args: VecDeque<String> = matches.get_many::<String>("args").into_iter().flatten().cloned().collect();

	let mut rash = Rash::new();
	let mut opts = startup_opts(&matches, &off);
	let mut shell_name = argv0.clone();

	let mode = if matches.get_flag("command") {
		let Some(text) = args.pop_front() else {
			fail("-c requires an argument", 2)
		};
		if let Some(name) = args.pop_front() {
			shell_name = name;
		}
		InputMode::Command(text)
	} else if !matches.get_flag("stdin") && !args.is_empty() {
		let script = args.pop_front().unwrap_or_default();
		let fd = match RustFd::open(&script, O_RDONLY, 0) {
			Ok(fd) => fd,
			Err(e) => {
				let errno = e.raw_os_error().map(Errno::from_raw).unwrap_or(Errno::ENOENT);
				fail(&format!("0: cannot open {script}: {}", errno.desc()), 127)
			}
		};
		// Keep the script clear of the low descriptors redirections use
		let high = RustFd::dup_high(fd.as_raw_fd(), 10).unwrap_or_else(|e| fail(&e.to_string(), 2));
		rash::utils::close_raw(fd.into_raw_fd());
		shell_name = script;
		InputMode::Script(high)
	} else {
		let tty = unsafe { libc::isatty(STDIN_FILENO) == 1 && libc::isatty(STDERR_FILENO) == 1 };
		if tty {
			opts |= ShOpts::INTERACTIVE;
		}
		InputMode::Stdin
	};
	if matches.get_flag("interactive") {
		opts |= ShOpts::INTERACTIVE;
	}
	if opts.contains(ShOpts::INTERACTIVE) && !matches.get_flag("monitor") && !off.contains(&'m') {
		opts |= ShOpts::MONITOR;
	}

	rash.meta_mut().opts = opts;
	rash.meta_mut().shell_name = shell_name;
	rash.meta_mut().set_login(matches.get_flag("login") || argv0.starts_with('-'));
	rash.vars_mut().set_params(args.into_iter().collect());

	if !rash.meta().is_interactive() {
		rash.meta_mut().traps.record_entry_state();
	}
	if rash.meta().has_opt(ShOpts::MONITOR) {
		rash.setup_job_control();
	}
	rash.refresh_signals();
	debug!("starting with options -{}", rash.meta().opts.letters());

	if rash.meta().is_login() {
		source_startup(&mut rash, "/etc/profile");
		if let Some(home) = rash.get_var("HOME").map(|home| home.to_string()) {
			source_startup(&mut rash, &format!("{home}/.profile"));
		}
	}
	if rash.meta().is_interactive() {
		if let Some(path) = env_file(&mut rash) {
			source_startup(&mut rash, &path);
		}
	}

	rash.run(mode)
}
