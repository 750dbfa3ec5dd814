use std::fs;
use std::io::Write;
use std::process::{Command, Output, Stdio};

fn rash() -> Command {
	let mut cmd = Command::new(env!("CARGO_BIN_EXE_rash"));
	cmd.env_remove("ENV").stdin(Stdio::null());
	cmd
}

fn run(script: &str) -> Output {
	rash().arg("-c").arg(script).output().unwrap()
}

fn run_in(dir: &std::path::Path, script: &str) -> Output {
	rash().arg("-c").arg(script).current_dir(dir).output().unwrap()
}

fn stdout(out: &Output) -> String {
	String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
	String::from_utf8_lossy(&out.stderr).into_owned()
}

#[test]
fn pipeline_status_is_last_stage() {
	let out = run("false | true; echo $?; true | false; echo $?");
	assert_eq!(stdout(&out), "0\n1\n");
}

#[test]
fn and_or_short_circuit() {
	let out = run("false && echo X; echo $?; true || echo X; echo $?");
	assert_eq!(stdout(&out), "1\n0\n");
}

#[test]
fn quoting_controls_field_splitting() {
	let out = run("count() { echo $#; }; v='a  b  c'; count \"$v\"; count $v; echo \"$v\"");
	assert_eq!(stdout(&out), "1\n3\na  b  c\n");
}

#[test]
fn unmatched_glob_is_passed_through() {
	let dir = tempfile::tempdir().unwrap();
	fs::write(dir.path().join("b.txt"), "").unwrap();
	fs::write(dir.path().join("a.txt"), "").unwrap();
	fs::write(dir.path().join(".hidden.txt"), "").unwrap();
	let out = run_in(dir.path(), "echo *.txt; echo *.nonexistent; echo .*.txt");
	assert_eq!(stdout(&out), "a.txt b.txt\n*.nonexistent\n.hidden.txt\n");
}

#[test]
fn local_restores_outer_binding() {
	let out = run("x=outer; f() { local x=inner; echo $x; x=changed; }; f; echo $x");
	assert_eq!(stdout(&out), "inner\nouter\n");
}

#[test]
fn noclobber_refuses_existing_file() {
	let dir = tempfile::tempdir().unwrap();
	let out = run_in(dir.path(), "set -C; echo a > f; echo b > f; echo $?; echo c >| f");
	assert_eq!(stdout(&out), "1\n");
	assert_eq!(fs::read_to_string(dir.path().join("f")).unwrap(), "c\n");
	assert!(!stderr(&out).is_empty());
}

#[test]
fn brace_redirect_does_not_leak() {
	let dir = tempfile::tempdir().unwrap();
	let out = run_in(dir.path(), "{ echo inside; } > f; echo outside");
	assert_eq!(stdout(&out), "outside\n");
	assert_eq!(fs::read_to_string(dir.path().join("f")).unwrap(), "inside\n");
}

#[test]
fn redirect_onto_closed_fd_is_undone() {
	let dir = tempfile::tempdir().unwrap();
	let out = run_in(dir.path(), "exec 3>&-; { :; } 3>f; echo leaked >&3; cat f");
	assert_eq!(stdout(&out), "");
	assert!(!stderr(&out).is_empty());
	assert_eq!(fs::read_to_string(dir.path().join("f")).unwrap(), "");
}

#[test]
fn syntax_error_exits_two() {
	let out = run("echo before; if then fi");
	assert_eq!(out.status.code(), Some(2));
	assert!(stderr(&out).contains("syntax error"));
}

#[test]
fn missing_command_is_127() {
	let out = run("no_such_command_for_rash_tests");
	assert_eq!(out.status.code(), Some(127));
	assert!(stderr(&out).contains("no_such_command_for_rash_tests: not found"));
}

#[test]
fn background_job_status_via_wait() {
	let out = run("(exit 3) & wait $!; echo $?");
	assert_eq!(stdout(&out), "3\n");
}

#[test]
fn cd_updates_pwd() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().display().to_string();
	let out = run(&format!("cd '{path}' && echo \"$PWD\"; cd - >/dev/null; echo \"$OLDPWD\""));
	assert_eq!(stdout(&out), format!("{path}\n{path}\n"));
}

#[test]
fn command_substitution_runs_apart() {
	let out = run("cd /; x=$(cd /tmp; echo a; echo b); echo \"$x\"; echo \"$PWD\"");
	assert_eq!(stdout(&out), "a\nb\n/\n");
}

#[test]
fn exit_trap_runs_last() {
	let out = run("trap 'echo bye' EXIT; echo hi; exit 4");
	assert_eq!(stdout(&out), "hi\nbye\n");
	assert_eq!(out.status.code(), Some(4));
}

#[test]
fn errexit_stops_script() {
	let out = run("set -e; if false; then :; fi; false || true; false; echo unreachable");
	assert_eq!(stdout(&out), "");
	assert_eq!(out.status.code(), Some(1));
}

#[test]
fn tested_function_call_ignores_errexit() {
	let out = run("f() { false; echo inside; }; set -e; f || true; echo after; f; echo unreachable");
	assert_eq!(stdout(&out), "inside\nafter\n");
	assert_eq!(out.status.code(), Some(1));
}

#[test]
fn non_utf8_bytes_pass_through() {
	let out = run("x=\"$(printf '\\377a\\376')\"; printf %s \"$x\"; echo '\\0377'");
	assert_eq!(out.stdout, b"\xffa\xfe\xff\n");
}

#[test]
fn exec_failure_names_the_line() {
	let dir = tempfile::tempdir().unwrap();
	fs::write(dir.path().join("notes"), "plain text\n").unwrap();
	let out = run_in(dir.path(), "true\n./notes");
	assert_eq!(out.status.code(), Some(126));
	assert!(stderr(&out).contains(": 2: ./notes: Permission denied"), "{}", stderr(&out));
}

#[test]
fn kill_names_a_missing_job_once() {
	let out = run("kill %9");
	let err = stderr(&out);
	assert!(err.contains("kill: %9: no such job"), "{err}");
	assert!(!err.contains("%9: %9"));
	assert_eq!(out.status.code(), Some(1));
}

#[test]
fn case_and_parameter_operators() {
	let script = "v=file.tar.gz; echo ${v%.*} ${v%%.*} ${v#*.} ${#v}; \
		case $v in *.c) echo c;; *.gz) echo gz;; esac";
	let out = run(script);
	assert_eq!(stdout(&out), "file.tar file tar.gz 11\ngz\n");
}

#[test]
fn arithmetic() {
	let out = run("i=5; echo $((1 + 2 * 3)) $((7 % 4)) $((1 << 4)) $((i += 2)) $i");
	assert_eq!(stdout(&out), "7 3 16 7 7\n");
}

#[test]
fn heredoc_feeds_read() {
	let out = run("name=world\nread a b <<EOF\nhello $name\nEOF\necho \"$b $a\"");
	assert_eq!(stdout(&out), "world hello\n");
}

#[test]
fn dash_c_name_and_args() {
	let out = rash().args(["-c", "echo $0 $1 $#", "myname", "one", "two"]).output().unwrap();
	assert_eq!(stdout(&out), "myname one 2\n");
}

#[test]
fn script_file_with_arguments() {
	let mut script = tempfile::NamedTempFile::new().unwrap();
	writeln!(script, "echo \"got $1\"").unwrap();
	writeln!(script, "exit 7").unwrap();
	let out = rash().arg(script.path()).arg("arg").output().unwrap();
	assert_eq!(stdout(&out), "got arg\n");
	assert_eq!(out.status.code(), Some(7));
}

#[test]
fn commands_from_stdin() {
	let mut child = rash()
		.stdin(Stdio::piped())
		.stdout(Stdio::piped())
		.spawn()
		.unwrap();
	child.stdin.take().unwrap().write_all(b"x=piped\necho $x\n").unwrap();
	let out = child.wait_with_output().unwrap();
	assert_eq!(stdout(&out), "piped\n");
}

#[test]
fn trapped_signals_wait_for_safe_points() {
	let script = "n=0; trap 'n=$((n+1))' USR1; i=0; \
		while [ $i -lt 50 ]; do kill -USR1 $$; i=$((i+1)); done; echo $i $n";
	let out = run(script);
	let text = stdout(&out);
	let fields: Vec<&str> = text.split_whitespace().collect();
	assert_eq!(fields.len(), 2);
	assert_eq!(fields[0], "50");
	let handled: u32 = fields[1].parse().unwrap();
	assert!((1..=50).contains(&handled));
	assert_eq!(out.status.code(), Some(0));
}

#[test]
fn trap_after_a_breaking_trap_still_runs() {
	let script = "trap 'echo two' USR2; \
		for i in 1 2; do trap break USR1; (kill -USR1 $$; kill -USR2 $$); echo one; done; echo after";
	let out = run(script);
	assert_eq!(stdout(&out), "one\nafter\ntwo\n");
}

#[test]
fn special_builtin_error_ends_script() {
	let out = run("shift 3; echo unreachable");
	assert_eq!(stdout(&out), "");
	assert_ne!(out.status.code(), Some(0));
}

#[test]
fn alias_expands_in_later_commands() {
	let out = run("alias greet='echo hello'\ngreet world");
	assert_eq!(stdout(&out), "hello world\n");
}
