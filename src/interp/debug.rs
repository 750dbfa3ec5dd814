use std::fmt;

use crate::interp::parse::{CaseArm, NdType, Node, Redir, RedirTarget};
use crate::interp::token::{Word, WordPart};

fn write_redirs(f: &mut fmt::Formatter<'_>, redirs: &[Redir]) -> fmt::Result {
	for redir in redirs {
		write!(f, " {redir}")?;
	}
	Ok(())
}

/// The first of `EOF`, `EOF_`, `EOF__`... that no line of the body equals
fn heredoc_delim(body: &str) -> String {
	let mut delim = String::from("EOF");
	while body.split('\n').any(|line| line == delim) {
		delim.push('_');
	}
	delim
}

impl fmt::Display for Redir {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.fd != self.op.default_fd() {
			write!(f, "{}", self.fd)?;
		}
		match &self.target {
			RedirTarget::Word(word) => write!(f, "{}{}", self.op.as_str(), word.text),
			RedirTarget::HereDoc(body) => match body.get() {
				Some(body) if matches!(body.parts.as_slice(), [WordPart::SQuote(_)]) => {
					write!(f, "{}'{}'", self.op.as_str(), heredoc_delim(&body.text))
				}
				Some(body) => write!(f, "{}{}", self.op.as_str(), heredoc_delim(&body.text)),
				None => write!(f, "{}EOF", self.op.as_str())
			}
		}
	}
}

impl fmt::Display for CaseArm {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let patterns: Vec<&str> = self.patterns.iter().map(|word| word.text.as_str()).collect();
		write!(f, "{})", patterns.join("|"))?;
		if let Some(body) = &self.body {
			write!(f, " {}", Line(body))?;
		}
		write!(f, ";;")
	}
}

/// Renders a node back into shell source. The command itself stays on one
/// line and any here-document bodies follow it, each closed by its delimiter.
/// Used for job listings and for printing function definitions.
impl fmt::Display for Node {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", Line(self))?;
		let mut docs = vec![];
		collect_heredocs(self, &mut docs);
		for body in docs {
			writeln!(f)?;
			write!(f, "{}", body.text)?;
			if !body.text.is_empty() && !body.text.ends_with('\n') {
				writeln!(f)?;
			}
			write!(f, "{}", heredoc_delim(&body.text))?;
		}
		Ok(())
	}
}

fn redir_heredocs<'a>(redirs: &'a [Redir], out: &mut Vec<&'a Word>) {
	for redir in redirs {
		if let RedirTarget::HereDoc(body) = &redir.target {
			if let Some(body) = body.get() {
				out.push(body);
			}
		}
	}
}

/// Here-document bodies in the order the lexer reads them
fn collect_heredocs<'a>(node: &'a Node, out: &mut Vec<&'a Word>) {
	match &node.nd_type {
		NdType::Command { redirs, .. } => redir_heredocs(redirs, out),
		NdType::Pipeline { cmds } => {
			for cmd in cmds {
				collect_heredocs(cmd, out);
			}
		}
		NdType::Not { body } |
		NdType::Background { body } |
		NdType::Brace { body } => collect_heredocs(body, out),
		NdType::And { left, right } |
		NdType::Or { left, right } |
		NdType::List { left, right } => {
			collect_heredocs(left, out);
			collect_heredocs(right, out);
		}
		NdType::If { cond, then_body, else_body } => {
			collect_heredocs(cond, out);
			collect_heredocs(then_body, out);
			if let Some(else_body) = else_body {
				collect_heredocs(else_body, out);
			}
		}
		NdType::While { cond, body } | NdType::Until { cond, body } => {
			collect_heredocs(cond, out);
			collect_heredocs(body, out);
		}
		NdType::For { body, .. } => collect_heredocs(body, out),
		NdType::Case { arms, .. } => {
			for body in arms.iter().filter_map(|arm| arm.body.as_deref()) {
				collect_heredocs(body, out);
			}
		}
		NdType::Subshell { body, redirs } | NdType::Redirected { body, redirs } => {
			collect_heredocs(body, out);
			redir_heredocs(redirs, out);
		}
		NdType::FuncDef { body, .. } => collect_heredocs(body, out),
	}
}

/// The single-line part of a node's source
struct Line<'a>(&'a Node);

impl fmt::Display for Line<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.0.nd_type {
			NdType::Command { assigns, argv, redirs } => {
				let words: Vec<&str> = assigns.iter().chain(argv.iter()).map(|word| word.text.as_str()).collect();
				write!(f, "{}", words.join(" "))?;
				if words.is_empty() {
					// Redirection only, drop the leading space
					let mut first = true;
					for redir in redirs {
						if !first { write!(f, " ")?; }
						write!(f, "{redir}")?;
						first = false;
					}
					Ok(())
				} else {
					write_redirs(f, redirs)
				}
			}
			NdType::Pipeline { cmds } => {
				let cmds: Vec<String> = cmds.iter().map(|cmd| Line(cmd).to_string()).collect();
				write!(f, "{}", cmds.join(" | "))
			}
			NdType::Not { body } => write!(f, "! {}", Line(body)),
			NdType::And { left, right } => write!(f, "{} && {}", Line(left), Line(right)),
			NdType::Or { left, right } => write!(f, "{} || {}", Line(left), Line(right)),
			NdType::List { left, right } => {
				if matches!(left.nd_type, NdType::Background { .. }) {
					write!(f, "{} {}", Line(left), Line(right))
				} else {
					write!(f, "{}; {}", Line(left), Line(right))
				}
			}
			NdType::Background { body } => write!(f, "{} &", Line(body)),
			NdType::If { cond, then_body, else_body } => {
				write!(f, "if {}; then {}; ", Line(cond), Line(then_body))?;
				let mut rest = else_body.as_deref();
				while let Some(node) = rest {
					match &node.nd_type {
						NdType::If { cond, then_body, else_body } => {
							write!(f, "elif {}; then {}; ", Line(cond), Line(then_body))?;
							rest = else_body.as_deref();
						}
						_ => {
							write!(f, "else {}; ", Line(node))?;
							rest = None;
						}
					}
				}
				write!(f, "fi")
			}
			NdType::While { cond, body } => write!(f, "while {}; do {}; done", Line(cond), Line(body)),
			NdType::Until { cond, body } => write!(f, "until {}; do {}; done", Line(cond), Line(body)),
			NdType::For { var, items, body } => {
				write!(f, "for {var}")?;
				if let Some(items) = items {
					write!(f, " in")?;
					for item in items {
						write!(f, " {}", item.text)?;
					}
				}
				write!(f, "; do {}; done", Line(body))
			}
			NdType::Case { subject, arms } => {
				write!(f, "case {} in", subject.text)?;
				for arm in arms {
					write!(f, " {arm}")?;
				}
				write!(f, " esac")
			}
			NdType::Subshell { body, redirs } => {
				write!(f, "({})", Line(body))?;
				write_redirs(f, redirs)
			}
			NdType::Brace { body } => write!(f, "{{ {}; }}", Line(body)),
			NdType::Redirected { body, redirs } => {
				write!(f, "{}", Line(body))?;
				write_redirs(f, redirs)
			}
			NdType::FuncDef { name, body } => write!(f, "{name}() {}", Line(body)),
		}
	}
}

impl Node {
	/// An indented outline of the tree, for trace logging
	pub fn dump_tree(&self) -> String {
		let mut out = String::new();
		write_tree(self, &mut out, 0);
		out
	}
}

fn write_tree(node: &Node, out: &mut String, indent: usize) {
	let prefix = "|   ".repeat(indent);
	let line = |out: &mut String, text: String| {
		out.push_str(&prefix);
		out.push_str(&text);
		out.push('\n');
	};
	match &node.nd_type {
		NdType::Command { assigns, argv, redirs } => {
			let assigns: Vec<&str> = assigns.iter().map(|w| w.text.as_str()).collect();
			let args: Vec<&str> = argv.iter().map(|w| w.text.as_str()).collect();
			let redirs: Vec<String> = redirs.iter().map(|r| r.to_string()).collect();
			line(out, format!("Command (assigns: {assigns:?}, args: {args:?}, redirs: {redirs:?})"));
		}
		NdType::Pipeline { cmds } => {
			line(out, "Pipeline".into());
			for cmd in cmds {
				write_tree(cmd, out, indent + 1);
			}
		}
		NdType::Not { body } => {
			line(out, "Not".into());
			write_tree(body, out, indent + 1);
		}
		NdType::And { left, right } |
		NdType::Or { left, right } |
		NdType::List { left, right } => {
			let name = match node.nd_type {
				NdType::And { .. } => "And",
				NdType::Or { .. } => "Or",
				_ => "List"
			};
			line(out, name.into());
			write_tree(left, out, indent + 1);
			write_tree(right, out, indent + 1);
		}
		NdType::Background { body } => {
			line(out, "Background".into());
			write_tree(body, out, indent + 1);
		}
		NdType::If { cond, then_body, else_body } => {
			line(out, "If".into());
			line(out, "|--- Condition".into());
			write_tree(cond, out, indent + 2);
			line(out, "|--- Body".into());
			write_tree(then_body, out, indent + 2);
			if let Some(else_body) = else_body {
				line(out, "|--- Else".into());
				write_tree(else_body, out, indent + 2);
			}
		}
		NdType::While { cond, body } | NdType::Until { cond, body } => {
			let name = if matches!(node.nd_type, NdType::While { .. }) { "While" } else { "Until" };
			line(out, name.into());
			line(out, "|--- Condition".into());
			write_tree(cond, out, indent + 2);
			line(out, "|--- Body".into());
			write_tree(body, out, indent + 2);
		}
		NdType::For { var, items, body } => {
			let items: Option<Vec<&str>> = items.as_ref().map(|items| items.iter().map(|w| w.text.as_str()).collect());
			line(out, format!("For (var: {var}, items: {items:?})"));
			write_tree(body, out, indent + 1);
		}
		NdType::Case { subject, arms } => {
			line(out, format!("Case (subject: {})", subject.text));
			for arm in arms {
				let patterns: Vec<&str> = arm.patterns.iter().map(|w| w.text.as_str()).collect();
				line(out, format!("|--- Pattern: {patterns:?}"));
				if let Some(body) = &arm.body {
					write_tree(body, out, indent + 2);
				}
			}
		}
		NdType::Subshell { body, redirs } => {
			line(out, format!("Subshell (redirs: {})", redirs.len()));
			write_tree(body, out, indent + 1);
		}
		NdType::Brace { body } => {
			line(out, "Brace".into());
			write_tree(body, out, indent + 1);
		}
		NdType::Redirected { body, redirs } => {
			let redirs: Vec<String> = redirs.iter().map(|r| r.to_string()).collect();
			line(out, format!("Redirected (redirs: {redirs:?})"));
			write_tree(body, out, indent + 1);
		}
		NdType::FuncDef { name, body } => {
			line(out, format!("Function Definition (name: {name})"));
			write_tree(body, out, indent + 1);
		}
	}
}

#[cfg(test)]
mod tests {
	use crate::interp::parse::{ParseResult, Parser};
	use crate::interp::token::Lexer;
	use crate::prelude::*;

	fn parse(input: &str) -> crate::interp::parse::Node {
		let mut lexer = Lexer::from_str(input, 1, HashMap::new());
		match Parser::new(&mut lexer).parse_cmd().unwrap() {
			ParseResult::Cmd(node) => node,
			other => panic!("expected a command, got {other:?}")
		}
	}

	#[test]
	fn unparse_reads_like_source() {
		let node = parse("a | b && ! c || d 2>&1 >>log &");
		assert_eq!(node.to_string(), "a | b && ! c || d 2>&1 >>log &");
		let node = parse("if x; then y; elif z; then w; else v; fi");
		assert_eq!(node.to_string(), "if x; then y; elif z; then w; else v; fi");
		let node = parse("f() { for i in 1 2; do echo $i; done; }");
		assert_eq!(node.to_string(), "f() { for i in 1 2; do echo $i; done; }");
	}

	#[test]
	fn heredoc_bodies_follow_the_line() {
		let node = parse("cat <<EOF\nhello\nEOF\n");
		assert_eq!(node.to_string(), "cat <<EOF\nhello\nEOF");
		// A body line equal to the usual delimiter pushes it aside
		let node = parse("wc -l <<'X'\nEOF\nX\n");
		assert_eq!(node.to_string(), "wc -l <<'EOF_'\nEOF\nEOF_");
	}

	#[test]
	fn reparse_gives_the_same_tree() {
		let sources = [
			"cat <<EOF | tr a-z A-Z\nhello $name\nEOF\n",
			"cat <<-'END' >out; wc -l <<X\n\tliteral $x\nEND\nEOF\nX\n",
			"case $1 in a|b) echo one >&2;; *) { echo two; } 2>/dev/null;; esac",
			"f() { while read l; do echo \"$l\"; done <in >>log; }",
		];
		for src in sources {
			let node = parse(src);
			let text = node.to_string();
			let again = parse(&text);
			assert_eq!(again, node, "{text}");
			assert_eq!(again.to_string(), text);
		}
	}

	#[test]
	fn tree_outline() {
		let node = parse("while read x; do echo \"$x\"; done");
		insta::assert_snapshot!(node.dump_tree(), @r###"
		While
		|--- Condition
		|   |   Command (assigns: [], args: ["read", "x"], redirs: [])
		|--- Body
		|   |   Command (assigns: [], args: ["echo", "\"$x\""], redirs: [])
		"###);
	}
}
