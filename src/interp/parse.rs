use log::trace;
use once_cell::unsync::OnceCell;

use crate::prelude::*;
use crate::interp::token::{HereDocReq, Lexer, RedirOp, Tk, TkType, Word, WordPart, KEYWORDS};

/// Words that close a compound list
const LIST_ENDERS: [&str;8] = ["then", "else", "elif", "fi", "do", "done", "esac", "}"];

#[derive(Debug,Clone,PartialEq)]
pub enum RedirTarget {
	Word(Word),
	/// Filled in by the lexer once the body has been read
	HereDoc(Rc<OnceCell<Word>>),
}

#[derive(Debug,Clone,PartialEq)]
pub struct Redir {
	pub fd: RawFd,
	pub op: RedirOp,
	pub target: RedirTarget
}

#[derive(Debug,Clone,PartialEq)]
pub struct CaseArm {
	pub patterns: Vec<Word>,
	pub body: Option<Box<Node>>
}

#[derive(Debug,Clone,PartialEq)]
pub struct Node {
	pub nd_type: NdType,
	pub line: usize
}

impl Node {
	pub fn new(nd_type: NdType, line: usize) -> Self {
		Self { nd_type, line }
	}
	pub fn node_type(&self) -> &NdType {
		&self.nd_type
	}
	/// Nodes that `set -e` looks at directly. Compound commands defer to their contents.
	pub fn is_simple(&self) -> bool {
		matches!(self.nd_type, NdType::Command { .. } | NdType::Pipeline { .. } | NdType::Subshell { .. })
	}
}

#[derive(Debug,Clone,PartialEq)]
pub enum NdType {
	Command { assigns: Vec<Word>, argv: Vec<Word>, redirs: Vec<Redir> },
	Pipeline { cmds: Vec<Node> },
	Not { body: Box<Node> },
	And { left: Box<Node>, right: Box<Node> },
	Or { left: Box<Node>, right: Box<Node> },
	List { left: Box<Node>, right: Box<Node> },
	Background { body: Box<Node> },
	If { cond: Box<Node>, then_body: Box<Node>, else_body: Option<Box<Node>> },
	While { cond: Box<Node>, body: Box<Node> },
	Until { cond: Box<Node>, body: Box<Node> },
	For { var: String, items: Option<Vec<Word>>, body: Box<Node> },
	Case { subject: Word, arms: Vec<CaseArm> },
	Subshell { body: Box<Node>, redirs: Vec<Redir> },
	Brace { body: Box<Node> },
	/// A compound command followed by redirections
	Redirected { body: Box<Node>, redirs: Vec<Redir> },
	/// The body is shared with the function table, which may outlive this tree
	FuncDef { name: String, body: Rc<Node> },
}

#[derive(Debug)]
pub enum ParseResult {
	Cmd(Node),
	/// A blank line
	Empty,
	Eof
}

pub struct Parser<'a> {
	lexer: &'a mut Lexer,
}

impl<'a> Parser<'a> {
	pub fn new(lexer: &'a mut Lexer) -> Self {
		Self { lexer }
	}

	fn next(&mut self) -> RashResult<Tk> {
		self.lexer.next_token()
	}

	fn peek(&mut self) -> RashResult<&Tk> {
		self.lexer.peek_token()
	}

	fn push_back(&mut self, tk: Tk) {
		self.lexer.push_back(tk)
	}

	fn unexpected(tk: &Tk, expecting: Option<&str>) -> RashErr {
		let mut msg = format!("unexpected {}", tk.tk_type.describe());
		if let Some(expected) = expecting {
			msg.push_str(&format!(" (expecting \"{expected}\")"));
		}
		High(RashErrHigh::syntax_err(msg, tk.line))
	}

	fn expect_kw(&mut self, kw: &str) -> RashResult<()> {
		let tk = self.next()?;
		if tk.is_keyword(kw) {
			Ok(())
		} else {
			Err(Self::unexpected(&tk, Some(kw)))
		}
	}

	fn skip_newlines(&mut self) -> RashResult<()> {
		while self.peek()?.tk_type == TkType::Newline {
			self.next()?;
		}
		Ok(())
	}

	/// Fetch a token in command position, expanding aliases
	fn cmd_token(&mut self) -> RashResult<Tk> {
		self.lexer.take_alias_check();
		let tk = self.next()?;
		self.expand_alias(tk)
	}

	fn expand_alias(&mut self, mut tk: Tk) -> RashResult<Tk> {
		loop {
			let alias = tk.word()
				.and_then(|word| word.literal())
				.filter(|name| !KEYWORDS.contains(name))
				.and_then(|name| self.lexer.alias_value(name).map(|value| (name.to_string(), value)));
			match alias {
				Some((name, value)) => {
					self.lexer.push_alias(&name, &value);
					tk = self.next()?;
				}
				None => return Ok(tk)
			}
		}
	}

	fn ends_list(tk: &Tk) -> bool {
		match &tk.tk_type {
			TkType::Eof | TkType::RParen | TkType::DSemi => true,
			TkType::Word(word) => word.literal().is_some_and(|text| LIST_ENDERS.contains(&text)),
			_ => false
		}
	}

	/// One complete command from the top level, ending at a newline or end of input
	pub fn parse_cmd(&mut self) -> RashResult<ParseResult> {
		self.lexer.begin_command();
		let tk = self.next()?;
		match tk.tk_type {
			TkType::Eof => Ok(ParseResult::Eof),
			TkType::Newline => Ok(ParseResult::Empty),
			_ => {
				self.push_back(tk);
				let node = self.list(true)?;
				trace!("parsed command:\n{}", node.dump_tree());
				Ok(ParseResult::Cmd(node))
			}
		}
	}

	/// Everything up to end of input as one list. `None` when there is nothing but blanks.
	pub fn parse_all(&mut self) -> RashResult<Option<Box<Node>>> {
		let mut nodes = vec![];
		loop {
			match self.parse_cmd()? {
				ParseResult::Eof => break,
				ParseResult::Empty => continue,
				ParseResult::Cmd(node) => nodes.push(node)
			}
		}
		Ok(fold_list(nodes).map(Box::new))
	}

	/// The inside of `$(...)`, with the opening paren already consumed
	pub fn parse_cmd_sub(&mut self) -> RashResult<Option<Box<Node>>> {
		self.skip_newlines()?;
		if self.peek()?.tk_type == TkType::RParen {
			self.next()?;
			return Ok(None)
		}
		let node = self.list(false)?;
		let tk = self.next()?;
		if tk.tk_type != TkType::RParen {
			return Err(Self::unexpected(&tk, Some(")")))
		}
		Ok(Some(Box::new(node)))
	}

	fn list(&mut self, top: bool) -> RashResult<Node> {
		if !top {
			self.skip_newlines()?;
		}
		let mut nodes = vec![];
		loop {
			let mut node = self.and_or()?;
			let tk = self.next()?;
			let mut done = false;
			match tk.tk_type {
				TkType::Amp => {
					let line = node.line;
					node = Node::new(NdType::Background { body: Box::new(node) }, line);
				}
				TkType::Semi => {}
				TkType::Newline if top => done = true,
				TkType::Newline => {}
				TkType::Eof if top => {
					self.push_back(tk);
					done = true;
				}
				_ if top => return Err(Self::unexpected(&tk, None)),
				_ => {
					self.push_back(tk);
					done = true;
				}
			}
			nodes.push(node);

			if !done {
				if top {
					match self.peek()?.tk_type {
						TkType::Newline => {
							self.next()?;
							done = true;
						}
						TkType::Eof => done = true,
						_ => {}
					}
				} else {
					self.skip_newlines()?;
					done = Self::ends_list(self.peek()?);
				}
			}
			if done {
				break
			}
		}
		fold_list(nodes).ok_or_else(|| RashErr::internal("empty command list"))
	}

	fn and_or(&mut self) -> RashResult<Node> {
		let mut node = self.pipeline()?;
		loop {
			let tk = self.next()?;
			let is_and = match tk.tk_type {
				TkType::AndIf => true,
				TkType::OrIf => false,
				_ => {
					self.push_back(tk);
					return Ok(node)
				}
			};
			self.skip_newlines()?;
			let right = Box::new(self.pipeline()?);
			let left = Box::new(node);
			let line = left.line;
			node = if is_and {
				Node::new(NdType::And { left, right }, line)
			} else {
				Node::new(NdType::Or { left, right }, line)
			};
		}
	}

	fn pipeline(&mut self) -> RashResult<Node> {
		let mut tk = self.cmd_token()?;
		let line = tk.line;
		let negate = tk.is_keyword("!");
		if negate {
			tk = self.cmd_token()?;
		}
		let mut cmds = vec![self.command(tk)?];
		loop {
			let tk = self.next()?;
			if tk.tk_type != TkType::Pipe {
				self.push_back(tk);
				break
			}
			self.skip_newlines()?;
			let tk = self.cmd_token()?;
			cmds.push(self.command(tk)?);
		}
		let node = if cmds.len() == 1 {
			cmds.remove(0)
		} else {
			Node::new(NdType::Pipeline { cmds }, line)
		};
		if negate {
			Ok(Node::new(NdType::Not { body: Box::new(node) }, line))
		} else {
			Ok(node)
		}
	}

	fn command(&mut self, first: Tk) -> RashResult<Node> {
		let line = first.line;
		let compound = match &first.tk_type {
			TkType::LParen => {
				let body = self.list(false)?;
				let tk = self.next()?;
				if tk.tk_type != TkType::RParen {
					return Err(Self::unexpected(&tk, Some(")")))
				}
				let redirs = self.redir_list()?;
				return Ok(Node::new(NdType::Subshell { body: Box::new(body), redirs }, line))
			}
			TkType::Word(word) => match word.literal() {
				Some("if") => self.if_rest(line)?,
				Some("while") => self.loop_rest(true, line)?,
				Some("until") => self.loop_rest(false, line)?,
				Some("for") => self.for_rest(line)?,
				Some("case") => self.case_rest(line)?,
				Some("{") => {
					let body = self.list(false)?;
					self.expect_kw("}")?;
					Node::new(NdType::Brace { body: Box::new(body) }, line)
				}
				Some(kw) if LIST_ENDERS.contains(&kw) => return Err(Self::unexpected(&first, None)),
				_ => return self.simple_command(first)
			}
			TkType::Redir { .. } => return self.simple_command(first),
			_ => return Err(Self::unexpected(&first, None))
		};
		let redirs = self.redir_list()?;
		if redirs.is_empty() {
			Ok(compound)
		} else {
			Ok(Node::new(NdType::Redirected { body: Box::new(compound), redirs }, line))
		}
	}

	fn simple_command(&mut self, first: Tk) -> RashResult<Node> {
		let line = first.line;
		let mut assigns = vec![];
		let mut argv: Vec<Word> = vec![];
		let mut redirs = vec![];
		let mut tk = first;
		loop {
			match tk.tk_type {
				TkType::Redir { fd, op } => redirs.push(self.redirect(fd, op)?),
				TkType::Word(word) => {
					let is_assign = argv.is_empty() && matches!(
						word.parts.first(),
						Some(WordPart::Lit(text)) if text.split_assignment().is_some()
					);
					if is_assign {
						assigns.push(word);
					} else {
						argv.push(word);
						if argv.len() == 1 && assigns.is_empty() && redirs.is_empty() && self.peek()?.tk_type == TkType::LParen {
							let name = argv.remove(0);
							return self.func_def(name, line)
						}
					}
				}
				_ => {
					self.push_back(tk);
					break
				}
			}
			tk = self.next()?;
			if self.lexer.take_alias_check() {
				tk = self.expand_alias(tk)?;
			}
		}
		Ok(Node::new(NdType::Command { assigns, argv, redirs }, line))
	}

	fn func_def(&mut self, name: Word, line: usize) -> RashResult<Node> {
		self.next()?; // (
		let tk = self.next()?;
		if tk.tk_type != TkType::RParen {
			return Err(Self::unexpected(&tk, Some(")")))
		}
		let Some(fname) = name.literal().filter(|text| text.is_valid_name()).map(|text| text.to_string()) else {
			return Err(High(RashErrHigh::syntax_err(format!("bad function name \"{}\"", name.text), line)))
		};
		self.skip_newlines()?;
		let tk = self.cmd_token()?;
		let is_compound = tk.tk_type == TkType::LParen || tk.word()
			.and_then(|word| word.literal())
			.is_some_and(|text| matches!(text, "{" | "if" | "while" | "until" | "for" | "case"));
		if !is_compound {
			return Err(Self::unexpected(&tk, None))
		}
		let body = self.command(tk)?;
		Ok(Node::new(NdType::FuncDef { name: fname, body: Rc::new(body) }, line))
	}

	fn redirect(&mut self, fd: Option<RawFd>, op: RedirOp) -> RashResult<Redir> {
		let tk = self.next()?;
		let TkType::Word(word) = tk.tk_type else {
			return Err(Self::unexpected(&tk, None))
		};
		let fd = fd.unwrap_or(op.default_fd());
		let target = match op {
			RedirOp::HereDoc | RedirOp::HereDocStrip => {
				let body = Rc::new(OnceCell::new());
				self.lexer.queue_heredoc(HereDocReq {
					delim: word.strip_quotes(),
					strip_tabs: op == RedirOp::HereDocStrip,
					quoted: word.is_quoted(),
					body: body.clone()
				});
				RedirTarget::HereDoc(body)
			}
			_ => RedirTarget::Word(word)
		};
		Ok(Redir { fd, op, target })
	}

	fn redir_list(&mut self) -> RashResult<Vec<Redir>> {
		let mut redirs = vec![];
		loop {
			let tk = self.next()?;
			match tk.tk_type {
				TkType::Redir { fd, op } => redirs.push(self.redirect(fd, op)?),
				_ => {
					self.push_back(tk);
					return Ok(redirs)
				}
			}
		}
	}

	/// After `if` or `elif`. Consumes the closing `fi`.
	fn if_rest(&mut self, line: usize) -> RashResult<Node> {
		let cond = Box::new(self.list(false)?);
		self.expect_kw("then")?;
		let then_body = Box::new(self.list(false)?);
		let tk = self.next()?;
		let else_body = match tk.word().and_then(|word| word.literal()) {
			Some("elif") => Some(Box::new(self.if_rest(tk.line)?)),
			Some("else") => {
				let body = self.list(false)?;
				self.expect_kw("fi")?;
				Some(Box::new(body))
			}
			Some("fi") => None,
			_ => return Err(Self::unexpected(&tk, Some("fi")))
		};
		Ok(Node::new(NdType::If { cond, then_body, else_body }, line))
	}

	fn loop_rest(&mut self, is_while: bool, line: usize) -> RashResult<Node> {
		let cond = Box::new(self.list(false)?);
		self.expect_kw("do")?;
		let body = Box::new(self.list(false)?);
		self.expect_kw("done")?;
		let nd_type = if is_while {
			NdType::While { cond, body }
		} else {
			NdType::Until { cond, body }
		};
		Ok(Node::new(nd_type, line))
	}

	fn for_rest(&mut self, line: usize) -> RashResult<Node> {
		let tk = self.next()?;
		let Some(var) = tk.word().and_then(|word| word.literal()).filter(|text| text.is_valid_name()).map(|text| text.to_string()) else {
			return Err(High(RashErrHigh::syntax_err(format!("bad for loop variable {}", tk.tk_type.describe()), tk.line)))
		};
		self.skip_newlines()?;
		let tk = self.next()?;
		let items = if tk.is_keyword("in") {
			let mut items = vec![];
			loop {
				let tk = self.next()?;
				match tk.tk_type {
					TkType::Word(word) => items.push(word),
					TkType::Semi | TkType::Newline => break,
					_ => return Err(Self::unexpected(&tk, Some("do")))
				}
			}
			Some(items)
		} else {
			if tk.tk_type != TkType::Semi {
				self.push_back(tk);
			}
			None
		};
		self.skip_newlines()?;
		self.expect_kw("do")?;
		let body = Box::new(self.list(false)?);
		self.expect_kw("done")?;
		Ok(Node::new(NdType::For { var, items, body }, line))
	}

	fn case_rest(&mut self, line: usize) -> RashResult<Node> {
		let tk = self.next()?;
		let TkType::Word(subject) = tk.tk_type else {
			return Err(Self::unexpected(&tk, None))
		};
		self.skip_newlines()?;
		self.expect_kw("in")?;
		let mut arms = vec![];
		loop {
			self.skip_newlines()?;
			let mut tk = self.next()?;
			if tk.is_keyword("esac") {
				break
			}
			if tk.tk_type == TkType::LParen {
				tk = self.next()?;
			}
			let mut patterns = vec![];
			loop {
				let TkType::Word(word) = tk.tk_type else {
					return Err(Self::unexpected(&tk, None))
				};
				patterns.push(word);
				let sep = self.next()?;
				match sep.tk_type {
					TkType::Pipe => tk = self.next()?,
					TkType::RParen => break,
					_ => return Err(Self::unexpected(&sep, Some(")")))
				}
			}
			self.skip_newlines()?;
			let at_end = {
				let next = self.peek()?;
				next.tk_type == TkType::DSemi || next.is_keyword("esac")
			};
			let body = if at_end { None } else { Some(Box::new(self.list(false)?)) };
			arms.push(CaseArm { patterns, body });

			let tk = self.next()?;
			if tk.is_keyword("esac") {
				break
			}
			if tk.tk_type != TkType::DSemi {
				return Err(Self::unexpected(&tk, Some(";;")))
			}
		}
		Ok(Node::new(NdType::Case { subject, arms }, line))
	}
}

/// Join a run of commands into a left-leaning sequence
pub fn fold_list(nodes: Vec<Node>) -> Option<Node> {
	let mut nodes = nodes.into_iter();
	let first = nodes.next()?;
	Some(nodes.fold(first, |left, right| {
		let line = left.line;
		Node::new(NdType::List { left: Box::new(left), right: Box::new(right) }, line)
	}))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(input: &str) -> RashResult<Node> {
		let mut lexer = Lexer::from_str(input, 1, HashMap::new());
		let mut parser = Parser::new(&mut lexer);
		match parser.parse_cmd()? {
			ParseResult::Cmd(node) => Ok(node),
			other => panic!("expected a command, got {other:?}")
		}
	}

	fn argv_text(node: &Node) -> Vec<String> {
		match &node.nd_type {
			NdType::Command { argv, .. } => argv.iter().map(|w| w.text.clone()).collect(),
			other => panic!("not a command: {other:?}")
		}
	}

	#[test]
	fn precedence_of_lists() {
		let node = parse("a && b || c; d &\n").unwrap();
		let NdType::List { left, right } = node.nd_type else { panic!() };
		assert!(matches!(left.nd_type, NdType::Or { .. }));
		assert!(matches!(right.nd_type, NdType::Background { .. }));
	}

	#[test]
	fn pipelines_and_negation() {
		let node = parse("! a | b | c").unwrap();
		let NdType::Not { body } = node.nd_type else { panic!() };
		let NdType::Pipeline { cmds } = body.nd_type else { panic!() };
		assert_eq!(cmds.len(), 3);
		assert_eq!(argv_text(&cmds[2]), vec!["c"]);
	}

	#[test]
	fn assignments_only_before_command_word() {
		let node = parse("A=1 B=2 cmd C=3 >out").unwrap();
		let NdType::Command { assigns, argv, redirs } = node.nd_type else { panic!() };
		assert_eq!(assigns.len(), 2);
		assert_eq!(argv.iter().map(|w| w.text.as_str()).collect::<Vec<_>>(), vec!["cmd", "C=3"]);
		assert_eq!(redirs.len(), 1);
		assert_eq!(redirs[0].fd, 1);
	}

	#[test]
	fn function_definition_needs_compound_body() {
		let node = parse("greet() { echo hi; }").unwrap();
		let NdType::FuncDef { name, body } = node.nd_type else { panic!() };
		assert_eq!(name, "greet");
		assert!(matches!(body.nd_type, NdType::Brace { .. }));

		assert!(parse("greet() echo hi").is_err());
	}

	#[test]
	fn if_elif_else_chain() {
		let node = parse("if a; then b; elif c; then d; else e; fi").unwrap();
		let NdType::If { else_body: Some(elif), .. } = node.nd_type else { panic!() };
		let NdType::If { else_body: Some(last), .. } = elif.nd_type else { panic!() };
		assert_eq!(argv_text(&last), vec!["e"]);
	}

	#[test]
	fn for_without_in_uses_params() {
		let node = parse("for x; do echo $x; done").unwrap();
		assert!(matches!(node.nd_type, NdType::For { items: None, .. }));
		let node = parse("for x in a b\ndo echo $x\ndone").unwrap();
		let NdType::For { items: Some(items), .. } = node.nd_type else { panic!() };
		assert_eq!(items.len(), 2);
	}

	#[test]
	fn case_arms() {
		let node = parse("case $x in\n a|b) echo ab;;\n (c) ;;\n *) echo other\nesac").unwrap();
		let NdType::Case { arms, .. } = node.nd_type else { panic!() };
		assert_eq!(arms.len(), 3);
		assert_eq!(arms[0].patterns.len(), 2);
		assert!(arms[1].body.is_none());
		assert!(arms[2].body.is_some());
	}

	#[test]
	fn compound_redirections_wrap() {
		let node = parse("{ echo a; } >out 2>&1").unwrap();
		let NdType::Redirected { body, redirs } = node.nd_type else { panic!() };
		assert!(matches!(body.nd_type, NdType::Brace { .. }));
		assert_eq!(redirs.len(), 2);
		let node = parse("(echo a) >out").unwrap();
		assert!(matches!(node.nd_type, NdType::Subshell { ref redirs, .. } if redirs.len() == 1));
	}

	#[test]
	fn missing_closer_names_expectation() {
		let err = parse("if true; then echo\n").unwrap_err();
		assert_eq!(err.to_string(), "2: syntax error: unexpected end of file (expecting \"fi\")");
		let err = parse("echo a )").unwrap_err();
		assert_eq!(err.to_string(), "1: syntax error: unexpected \")\"");
	}

	#[test]
	fn aliases_expand_in_command_position() {
		let mut aliases = HashMap::new();
		aliases.insert("ll".to_string(), "ls -l ".to_string());
		aliases.insert("dir".to_string(), "/tmp".to_string());
		let mut lexer = Lexer::from_str("ll dir ll", 1, aliases);
		let ParseResult::Cmd(node) = Parser::new(&mut lexer).parse_cmd().unwrap() else { panic!() };
		let NdType::Command { argv, .. } = node.nd_type else { panic!() };
		let texts: Vec<_> = argv.iter().map(|w| w.text.as_str()).collect();
		assert_eq!(texts, vec!["ls", "-l", "/tmp", "ll"]);
	}

	#[test]
	fn recursive_alias_stops() {
		let mut aliases = HashMap::new();
		aliases.insert("ls".to_string(), "ls -F".to_string());
		let mut lexer = Lexer::from_str("ls x", 1, aliases);
		let ParseResult::Cmd(node) = Parser::new(&mut lexer).parse_cmd().unwrap() else { panic!() };
		assert_eq!(argv_text(&node), vec!["ls", "-F", "x"]);
	}

	#[test]
	fn heredoc_attached_to_redirection() {
		let node = parse("cat <<'END'\n$x\nEND\n").unwrap();
		let NdType::Command { redirs, .. } = node.nd_type else { panic!() };
		let RedirTarget::HereDoc(body) = &redirs[0].target else { panic!() };
		assert_eq!(body.get().unwrap().parts, vec![WordPart::SQuote("$x\n".into())]);
	}
}
