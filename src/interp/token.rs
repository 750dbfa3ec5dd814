use std::mem::take;

use log::trace;
use once_cell::unsync::OnceCell;

use crate::prelude::*;
use crate::interp::parse::{Node, Parser};

pub const KEYWORDS: [&str;16] = [
	"if", "then", "else", "elif", "fi",
	"while", "until", "for", "in", "do", "done",
	"case", "esac", "{", "}", "!"
];

/// Characters that end an unquoted word
const WORD_BREAKS: [char;10] = [' ', '\t', '\n', ';', '&', '|', '<', '>', '(', ')'];
const SPECIAL_PARAMS: [char;7] = ['@', '*', '#', '?', '-', '$', '!'];

#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum ParamOp {
	Plain,
	Length,
	Default,
	Assign,
	Error,
	Alt,
	TrimSuffix,
	TrimSuffixLong,
	TrimPrefix,
	TrimPrefixLong,
}

impl ParamOp {
	pub fn as_str(&self) -> &'static str {
		match self {
			ParamOp::Plain | ParamOp::Length => "",
			ParamOp::Default => "-",
			ParamOp::Assign => "=",
			ParamOp::Error => "?",
			ParamOp::Alt => "+",
			ParamOp::TrimSuffix => "%",
			ParamOp::TrimSuffixLong => "%%",
			ParamOp::TrimPrefix => "#",
			ParamOp::TrimPrefixLong => "##",
		}
	}
}

/// `$name`, `${name}` and every `${name<op>word}` form
#[derive(Debug,Clone,PartialEq)]
pub struct ParamExp {
	pub name: String,
	pub op: ParamOp,
	/// `:` present, so an empty value counts as unset
	pub colon: bool,
	pub arg: Vec<WordPart>,
	/// Written inside double quotes
	pub in_dquote: bool,
}

impl ParamExp {
	fn plain(name: impl Into<String>, in_dquote: bool) -> Self {
		Self { name: name.into(), op: ParamOp::Plain, colon: false, arg: vec![], in_dquote }
	}
}

/// One lexical piece of a word. Quoting is carried by the variant rather than by
/// marker bytes, so literal text can never be confused with expansion syntax.
#[derive(Debug,Clone,PartialEq)]
pub enum WordPart {
	/// Unquoted text, or any text when inside `DQuote`
	Lit(String),
	/// Backslash-escaped characters
	Quoted(String),
	SQuote(String),
	DQuote(Vec<WordPart>),
	Param(ParamExp),
	/// `$(...)` or a back-quoted command. `None` for an empty body.
	CmdSub(Option<Box<Node>>),
	Arith(Vec<WordPart>),
}

#[derive(Debug,Clone,PartialEq)]
pub struct Word {
	/// The word exactly as written
	pub text: String,
	pub parts: Vec<WordPart>,
	pub line: usize,
}

impl Word {
	pub fn from_parts(text: impl Into<String>, parts: Vec<WordPart>, line: usize) -> Self {
		Self { text: text.into(), parts, line }
	}

	pub fn is_quoted(&self) -> bool {
		fn quoted(parts: &[WordPart]) -> bool {
			parts.iter().any(|part| matches!(part, WordPart::Quoted(_) | WordPart::SQuote(_) | WordPart::DQuote(_)))
		}
		quoted(&self.parts)
	}

	/// The text of a word made only of unquoted literal characters
	pub fn literal(&self) -> Option<&str> {
		match self.parts.as_slice() {
			[WordPart::Lit(text)] => Some(text.as_str()),
			_ => None
		}
	}

	pub fn is_keyword(&self, kw: &str) -> bool {
		self.literal() == Some(kw)
	}

	/// The source text with quoting characters removed, as used for here-document delimiters
	pub fn strip_quotes(&self) -> String {
		let mut result = String::new();
		let mut chars = self.text.chars();
		while let Some(ch) = chars.next() {
			match ch {
				'\\' => {
					if let Some(next) = chars.next() {
						result.push(next)
					}
				}
				'\'' => {
					for inner in chars.by_ref() {
						if inner == '\'' { break }
						result.push(inner);
					}
				}
				'"' => {
					while let Some(inner) = chars.next() {
						match inner {
							'"' => break,
							'\\' => {
								if let Some(next) = chars.next() {
									if !"$`\"\\".contains(next) {
										result.push('\\');
									}
									result.push(next);
								}
							}
							_ => result.push(inner)
						}
					}
				}
				_ => result.push(ch)
			}
		}
		result
	}
}

#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum RedirOp {
	Input,
	Output,
	Append,
	Clobber,
	ReadWrite,
	DupIn,
	DupOut,
	HereDoc,
	HereDocStrip,
}

impl RedirOp {
	pub fn default_fd(&self) -> RawFd {
		match self {
			RedirOp::Input |
			RedirOp::ReadWrite |
			RedirOp::DupIn |
			RedirOp::HereDoc |
			RedirOp::HereDocStrip => 0,
			_ => 1
		}
	}
	pub fn as_str(&self) -> &'static str {
		match self {
			RedirOp::Input => "<",
			RedirOp::Output => ">",
			RedirOp::Append => ">>",
			RedirOp::Clobber => ">|",
			RedirOp::ReadWrite => "<>",
			RedirOp::DupIn => "<&",
			RedirOp::DupOut => ">&",
			RedirOp::HereDoc => "<<",
			RedirOp::HereDocStrip => "<<-",
		}
	}
}

#[derive(Debug,Clone,PartialEq)]
pub enum TkType {
	Word(Word),
	Semi,
	DSemi,
	Amp,
	AndIf,
	OrIf,
	Pipe,
	LParen,
	RParen,
	Newline,
	Redir { fd: Option<RawFd>, op: RedirOp },
	Eof
}

impl TkType {
	/// How the token reads in a syntax error
	pub fn describe(&self) -> String {
		match self {
			TkType::Word(word) => format!("\"{}\"", word.text),
			TkType::Semi => "\";\"".into(),
			TkType::DSemi => "\";;\"".into(),
			TkType::Amp => "\"&\"".into(),
			TkType::AndIf => "\"&&\"".into(),
			TkType::OrIf => "\"||\"".into(),
			TkType::Pipe => "\"|\"".into(),
			TkType::LParen => "\"(\"".into(),
			TkType::RParen => "\")\"".into(),
			TkType::Newline => "newline".into(),
			TkType::Redir { op, .. } => format!("\"{}\"", op.as_str()),
			TkType::Eof => "end of file".into(),
		}
	}
}

#[derive(Debug,Clone,PartialEq)]
pub struct Tk {
	pub tk_type: TkType,
	pub line: usize
}

impl Tk {
	pub fn word(&self) -> Option<&Word> {
		match &self.tk_type {
			TkType::Word(word) => Some(word),
			_ => None
		}
	}
	pub fn is_keyword(&self, kw: &str) -> bool {
		self.word().is_some_and(|word| word.is_keyword(kw))
	}
}

/// Something the lexer can pull whole lines from
pub trait LineSource {
	/// The next line including its newline, or `None` at end of input
	fn next_line(&mut self, prompt: &str) -> RashResult<Option<String>>;
}

/// Lines of an in-memory string: `-c`, `eval`, traps, sourced files
pub struct StrSource {
	text: String,
	pos: usize
}

impl StrSource {
	pub fn new(text: impl Into<String>) -> Self {
		Self { text: text.into(), pos: 0 }
	}
}

impl LineSource for StrSource {
	fn next_line(&mut self, _prompt: &str) -> RashResult<Option<String>> {
		if self.pos >= self.text.len() {
			return Ok(None)
		}
		let rest = &self.text[self.pos..];
		let end = rest.find('\n').map(|i| i + 1).unwrap_or(rest.len());
		self.pos += end;
		Ok(Some(rest[..end].to_string()))
	}
}

/// Reads a descriptor one byte at a time so that commands started by the
/// shell see exactly the input the shell has not consumed yet.
pub struct FdSource {
	fd: RustFd
}

impl FdSource {
	pub fn new(fd: RustFd) -> Self {
		Self { fd }
	}
}

impl LineSource for FdSource {
	fn next_line(&mut self, _prompt: &str) -> RashResult<Option<String>> {
		let mut bytes = vec![];
		let mut byte = [0u8;1];
		loop {
			let n = self.fd.read(&mut byte)?;
			if n == 0 {
				break
			}
			bytes.push(byte[0]);
			if byte[0] == b'\n' {
				break
			}
		}
		if bytes.is_empty() {
			return Ok(None)
		}
		Ok(Some(crate::utils::decode_bytes(&bytes)))
	}
}

/// A body that the parser asked for when it saw `<<`, filled in once the
/// lexer reaches the end of the line the operator was on
#[derive(Debug)]
pub struct HereDocReq {
	pub delim: String,
	pub strip_tabs: bool,
	pub quoted: bool,
	pub body: Rc<OnceCell<Word>>,
}

struct Frame {
	buf: Vec<char>,
	pos: usize,
	source: Option<Box<dyn LineSource>>,
	/// Set when this frame holds the text of an alias
	alias: Option<String>,
	/// The blank that ends an alias has been handed out
	alias_done: bool,
}

enum Fill {
	Ready,
	/// An alias frame is exhausted but still counts as in use.
	/// Reads as one blank so the last word of the alias ends there.
	AliasEnd,
	Eof
}

#[derive(Debug,Clone,Copy,PartialEq,Eq)]
enum WordCtx {
	Base,
	/// The word after `${name<op>`
	ParamArg { in_dquote: bool },
	HereDoc,
}

pub struct Lexer {
	frames: Vec<Frame>,
	unread: Vec<char>,
	line: usize,
	pushback: Option<Tk>,
	pending_heredocs: Vec<HereDocReq>,
	aliases: HashMap<String,String>,
	captures: Vec<String>,
	ps1: String,
	ps2: String,
	need_ps1: bool,
	verbose: bool,
	at_eof: bool,
	/// An alias ending in a blank was just finished
	alias_blank: bool,
}

impl Lexer {
	pub fn new(source: Box<dyn LineSource>) -> Self {
		let base = Frame { buf: vec![], pos: 0, source: Some(source), alias: None, alias_done: false };
		Self {
			frames: vec![base],
			unread: vec![],
			line: 1,
			pushback: None,
			pending_heredocs: vec![],
			aliases: HashMap::new(),
			captures: vec![],
			ps1: String::new(),
			ps2: String::new(),
			need_ps1: true,
			verbose: false,
			at_eof: false,
			alias_blank: false,
		}
	}

	pub fn from_str(text: &str, line: usize, aliases: HashMap<String,String>) -> Self {
		let mut lexer = Self::new(Box::new(StrSource::new(text)));
		lexer.line = line;
		lexer.aliases = aliases;
		lexer
	}

	pub fn line(&self) -> usize {
		self.line
	}

	pub fn set_aliases(&mut self, aliases: HashMap<String,String>) {
		self.aliases = aliases;
	}

	pub fn set_prompts(&mut self, ps1: String, ps2: String) {
		self.ps1 = ps1;
		self.ps2 = ps2;
	}

	pub fn set_verbose(&mut self, verbose: bool) {
		self.verbose = verbose;
	}

	/// The next line read starts a new command and gets the primary prompt
	pub fn begin_command(&mut self) {
		self.need_ps1 = true;
	}

	/// Throw away whatever is left of the current line after a syntax error
	pub fn discard_line(&mut self) {
		self.pushback = None;
		self.pending_heredocs.clear();
		self.unread.clear();
		self.captures.clear();
		self.frames.truncate(1);
		if let Some(base) = self.frames.first_mut() {
			base.pos = base.buf.len();
		}
	}

	pub fn alias_value(&self, name: &str) -> Option<String> {
		if self.frames.iter().any(|frame| frame.alias.as_deref() == Some(name)) {
			return None
		}
		self.aliases.get(name).cloned()
	}

	/// Continue reading from the text of an alias before resuming the current input
	pub fn push_alias(&mut self, name: &str, value: &str) {
		trace!("expanding alias {name} -> {value}");
		self.frames.push(Frame {
			buf: value.chars().collect(),
			pos: 0,
			source: None,
			alias: Some(name.to_string()),
			alias_done: false
		});
	}

	/// True once after an alias whose text ends in a blank has been read through,
	/// meaning the word that follows is checked for aliases as well
	pub fn take_alias_check(&mut self) -> bool {
		take(&mut self.alias_blank)
	}

	pub fn queue_heredoc(&mut self, req: HereDocReq) {
		self.pending_heredocs.push(req);
	}

	pub fn push_back(&mut self, tk: Tk) {
		self.pushback = Some(tk);
	}

	pub fn peek_token(&mut self) -> RashResult<&Tk> {
		if self.pushback.is_none() {
			let tk = self.next_token()?;
			self.pushback = Some(tk);
		}
		match self.pushback.as_ref() {
			Some(tk) => Ok(tk),
			None => Err(RashErr::internal("token pushback vanished"))
		}
	}

	/// Make sure the top frame has a character ready
	fn fill(&mut self) -> RashResult<Fill> {
		loop {
			let Some(frame) = self.frames.last_mut() else {
				return Ok(Fill::Eof)
			};
			if frame.pos < frame.buf.len() {
				return Ok(Fill::Ready)
			}
			if frame.alias.is_some() {
				if !frame.alias_done {
					return Ok(Fill::AliasEnd)
				}
				let blank = frame.buf.last().is_some_and(|ch| matches!(ch, ' ' | '\t'));
				self.frames.pop();
				self.alias_blank = blank;
				continue
			}
			let Some(source) = frame.source.as_mut() else {
				return Ok(Fill::Eof)
			};
			if self.at_eof {
				return Ok(Fill::Eof)
			}
			let prompt = if self.need_ps1 { &self.ps1 } else { &self.ps2 };
			let next = source.next_line(prompt)?;
			self.need_ps1 = false;
			match next {
				Some(line) => {
					if self.verbose {
						let _ = crate::utils::write_err(&line);
					}
					frame.buf = line.chars().collect();
					frame.pos = 0;
				}
				None => {
					self.at_eof = true;
					return Ok(Fill::Eof)
				}
			}
		}
	}

	fn peekc(&mut self) -> RashResult<Option<char>> {
		if let Some(ch) = self.unread.last() {
			return Ok(Some(*ch))
		}
		match self.fill()? {
			Fill::Ready => Ok(self.frames.last().map(|frame| frame.buf[frame.pos])),
			Fill::AliasEnd => Ok(Some(' ')),
			Fill::Eof => Ok(None)
		}
	}

	fn getc(&mut self) -> RashResult<Option<char>> {
		let ch = match self.unread.pop() {
			Some(ch) => ch,
			None => {
				let state = self.fill()?;
				let Some(frame) = self.frames.last_mut() else {
					return Ok(None)
				};
				match state {
					Fill::Ready => {
						let ch = frame.buf[frame.pos];
						frame.pos += 1;
						ch
					}
					Fill::AliasEnd => {
						frame.alias_done = true;
						' '
					}
					Fill::Eof => return Ok(None)
				}
			}
		};
		if ch == '\n' {
			self.line += 1;
		}
		for capture in self.captures.iter_mut() {
			capture.push(ch);
		}
		Ok(Some(ch))
	}

	fn ungetc(&mut self, ch: char) {
		if ch == '\n' {
			self.line -= 1;
		}
		for capture in self.captures.iter_mut() {
			capture.pop();
		}
		self.unread.push(ch);
	}

	fn unterminated(&self, what: &str, line: usize) -> RashErr {
		High(RashErrHigh::syntax_err(format!("unterminated {what}"), line))
	}

	pub fn next_token(&mut self) -> RashResult<Tk> {
		if let Some(tk) = self.pushback.take() {
			return Ok(tk)
		}
		loop {
			match self.peekc()? {
				Some(' ' | '\t') => { self.getc()?; }
				Some('#') => {
					while !matches!(self.peekc()?, Some('\n') | None) {
						self.getc()?;
					}
				}
				Some('\\') => {
					self.getc()?;
					if self.peekc()? == Some('\n') {
						self.getc()?;
					} else {
						self.ungetc('\\');
						break
					}
				}
				_ => break
			}
		}

		let line = self.line;
		let tk_type = match self.peekc()? {
			None => {
				self.read_heredocs()?;
				TkType::Eof
			}
			Some('\n') => {
				self.getc()?;
				self.read_heredocs()?;
				TkType::Newline
			}
			Some(';') => {
				self.getc()?;
				if self.peekc()? == Some(';') {
					self.getc()?;
					TkType::DSemi
				} else {
					TkType::Semi
				}
			}
			Some('&') => {
				self.getc()?;
				if self.peekc()? == Some('&') {
					self.getc()?;
					TkType::AndIf
				} else {
					TkType::Amp
				}
			}
			Some('|') => {
				self.getc()?;
				if self.peekc()? == Some('|') {
					self.getc()?;
					TkType::OrIf
				} else {
					TkType::Pipe
				}
			}
			Some('(') => { self.getc()?; TkType::LParen }
			Some(')') => { self.getc()?; TkType::RParen }
			Some('<' | '>') => self.read_redir_op(None)?,
			Some(_) => {
				let word = self.read_word()?;
				let io_number = word.literal()
					.filter(|text| text.is_digits())
					.and_then(|text| text.parse::<RawFd>().ok());
				match io_number {
					Some(fd) if matches!(self.peekc()?, Some('<' | '>')) => self.read_redir_op(Some(fd))?,
					_ => TkType::Word(word)
				}
			}
		};
		Ok(Tk { tk_type, line })
	}

	fn read_redir_op(&mut self, fd: Option<RawFd>) -> RashResult<TkType> {
		let op = match self.getc()? {
			Some('<') => match self.peekc()? {
				Some('<') => {
					self.getc()?;
					if self.peekc()? == Some('-') {
						self.getc()?;
						RedirOp::HereDocStrip
					} else {
						RedirOp::HereDoc
					}
				}
				Some('&') => { self.getc()?; RedirOp::DupIn }
				Some('>') => { self.getc()?; RedirOp::ReadWrite }
				_ => RedirOp::Input
			}
			Some('>') => match self.peekc()? {
				Some('>') => { self.getc()?; RedirOp::Append }
				Some('&') => { self.getc()?; RedirOp::DupOut }
				Some('|') => { self.getc()?; RedirOp::Clobber }
				_ => RedirOp::Output
			}
			_ => return Err(RashErr::internal("redirection operator expected"))
		};
		Ok(TkType::Redir { fd, op })
	}

	fn read_word(&mut self) -> RashResult<Word> {
		let line = self.line;
		self.captures.push(String::new());
		let result = self.read_word_parts(WordCtx::Base);
		let text = self.captures.pop().unwrap_or_default();
		let parts = result?;
		Ok(Word { text, parts, line })
	}

	fn read_word_parts(&mut self, ctx: WordCtx) -> RashResult<Vec<WordPart>> {
		let start = self.line;
		let mut parts = vec![];
		let mut depth = 0usize;
		loop {
			let Some(ch) = self.peekc()? else {
				match ctx {
					WordCtx::ParamArg { .. } => return Err(self.unterminated("parameter expansion", start)),
					_ => break
				}
			};
			match ctx {
				WordCtx::Base if WORD_BREAKS.contains(&ch) => break,
				WordCtx::ParamArg { .. } if ch == '}' => {
					self.getc()?;
					if depth == 0 {
						break
					}
					depth -= 1;
					push_lit(&mut parts, ch);
					continue
				}
				WordCtx::ParamArg { .. } if ch == '{' => {
					self.getc()?;
					depth += 1;
					push_lit(&mut parts, ch);
					continue
				}
				_ => {}
			}
			let in_dquote = matches!(ctx, WordCtx::ParamArg { in_dquote: true } | WordCtx::HereDoc);
			self.getc()?;
			match ch {
				'\\' => {
					match self.getc()? {
						Some('\n') => continue,
						Some(next) if !in_dquote => push_quoted(&mut parts, next),
						Some(next) if "$`\\".contains(next) || (next == '"' && ctx != WordCtx::HereDoc) || (next == '}' && ctx != WordCtx::HereDoc) => push_quoted(&mut parts, next),
						Some(next) => {
							push_lit(&mut parts, '\\');
							push_lit(&mut parts, next);
						}
						None => push_lit(&mut parts, '\\')
					}
				}
				'\'' if !in_dquote => {
					let s = self.read_squote(start)?;
					parts.push(WordPart::SQuote(s));
				}
				'"' if ctx != WordCtx::HereDoc => {
					let inner = self.read_dquote(start)?;
					parts.push(WordPart::DQuote(inner));
				}
				'$' => self.read_dollar(&mut parts, in_dquote)?,
				'`' => {
					let sub = self.read_backquote(in_dquote, start)?;
					parts.push(sub);
				}
				_ => push_lit(&mut parts, ch)
			}
		}
		Ok(parts)
	}

	fn read_squote(&mut self, start: usize) -> RashResult<String> {
		let mut text = String::new();
		loop {
			match self.getc()? {
				Some('\'') => return Ok(text),
				Some(ch) => text.push(ch),
				None => return Err(self.unterminated("quoted string", start))
			}
		}
	}

	fn read_dquote(&mut self, start: usize) -> RashResult<Vec<WordPart>> {
		let mut parts = vec![];
		loop {
			match self.getc()? {
				Some('"') => return Ok(parts),
				Some('\\') => {
					match self.getc()? {
						Some('\n') => continue,
						Some(next) if "$`\"\\".contains(next) => push_lit(&mut parts, next),
						Some(next) => {
							push_lit(&mut parts, '\\');
							push_lit(&mut parts, next);
						}
						None => return Err(self.unterminated("quoted string", start))
					}
				}
				Some('$') => self.read_dollar(&mut parts, true)?,
				Some('`') => {
					let sub = self.read_backquote(true, start)?;
					parts.push(sub);
				}
				Some(ch) => push_lit(&mut parts, ch),
				None => return Err(self.unterminated("quoted string", start))
			}
		}
	}

	/// Called just after a `$` has been consumed
	fn read_dollar(&mut self, parts: &mut Vec<WordPart>, in_dquote: bool) -> RashResult<()> {
		match self.peekc()? {
			Some('{') => {
				self.getc()?;
				let param = self.read_braced_param(in_dquote)?;
				parts.push(WordPart::Param(param));
			}
			Some('(') => {
				self.getc()?;
				if self.peekc()? == Some('(') {
					self.getc()?;
					let expr = self.read_arith()?;
					parts.push(WordPart::Arith(expr));
				} else {
					let body = Parser::new(self).parse_cmd_sub()?;
					parts.push(WordPart::CmdSub(body));
				}
			}
			Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => {
				let mut name = String::new();
				while let Some(ch) = self.peekc()? {
					if !(ch.is_ascii_alphanumeric() || ch == '_') {
						break
					}
					self.getc()?;
					name.push(ch);
				}
				parts.push(WordPart::Param(ParamExp::plain(name, in_dquote)));
			}
			Some(ch) if ch.is_ascii_digit() || SPECIAL_PARAMS.contains(&ch) => {
				self.getc()?;
				parts.push(WordPart::Param(ParamExp::plain(ch, in_dquote)));
			}
			_ => push_lit(parts, '$')
		}
		Ok(())
	}

	/// Called just after `${` has been consumed
	fn read_braced_param(&mut self, in_dquote: bool) -> RashResult<ParamExp> {
		let bad_subst = || RashErr::syntax("bad substitution");
		let mut length = false;
		let mut first = self.getc()?.ok_or_else(bad_subst)?;
		if first == '#' && !matches!(self.peekc()?, Some('}')) {
			length = true;
			first = self.getc()?.ok_or_else(bad_subst)?;
		}

		let mut name = String::from(first);
		if first.is_ascii_alphabetic() || first == '_' {
			while let Some(ch) = self.peekc()? {
				if !(ch.is_ascii_alphanumeric() || ch == '_') {
					break
				}
				self.getc()?;
				name.push(ch);
			}
		} else if first.is_ascii_digit() {
			while let Some(ch) = self.peekc()? {
				if !ch.is_ascii_digit() {
					break
				}
				self.getc()?;
				name.push(ch);
			}
		} else if !SPECIAL_PARAMS.contains(&first) {
			return Err(bad_subst())
		}

		let mut param = ParamExp::plain(name, in_dquote);
		let mut next = self.getc()?.ok_or_else(bad_subst)?;
		if next == '}' {
			if length {
				param.op = ParamOp::Length;
			}
			return Ok(param)
		}
		if length {
			return Err(bad_subst())
		}
		if next == ':' {
			param.colon = true;
			next = self.getc()?.ok_or_else(bad_subst)?;
			if !"-=?+".contains(next) {
				return Err(bad_subst())
			}
		}
		param.op = match next {
			'-' => ParamOp::Default,
			'=' => ParamOp::Assign,
			'?' => ParamOp::Error,
			'+' => ParamOp::Alt,
			'%' => {
				if self.peekc()? == Some('%') {
					self.getc()?;
					ParamOp::TrimSuffixLong
				} else {
					ParamOp::TrimSuffix
				}
			}
			'#' => {
				if self.peekc()? == Some('#') {
					self.getc()?;
					ParamOp::TrimPrefixLong
				} else {
					ParamOp::TrimPrefix
				}
			}
			_ => return Err(bad_subst())
		};
		param.arg = self.read_word_parts(WordCtx::ParamArg { in_dquote })?;
		Ok(param)
	}

	/// Called just after `$((` has been consumed
	fn read_arith(&mut self) -> RashResult<Vec<WordPart>> {
		let start = self.line;
		let mut parts = vec![];
		let mut depth = 0usize;
		loop {
			let Some(ch) = self.getc()? else {
				return Err(self.unterminated("arithmetic expression", start))
			};
			match ch {
				'(' => {
					depth += 1;
					push_lit(&mut parts, ch);
				}
				')' if depth > 0 => {
					depth -= 1;
					push_lit(&mut parts, ch);
				}
				')' => {
					if self.getc()? == Some(')') {
						return Ok(parts)
					}
					return Err(RashErr::syntax("missing '))'"))
				}
				'$' => self.read_dollar(&mut parts, true)?,
				'`' => {
					let sub = self.read_backquote(true, start)?;
					parts.push(sub);
				}
				'\\' => {
					if let Some(next) = self.getc()? {
						if next != '\n' {
							push_quoted(&mut parts, next);
						}
					}
				}
				'\'' => {
					let s = self.read_squote(start)?;
					parts.push(WordPart::SQuote(s));
				}
				'"' => {
					let inner = self.read_dquote(start)?;
					parts.push(WordPart::DQuote(inner));
				}
				_ => push_lit(&mut parts, ch)
			}
		}
	}

	/// Collect the text up to the closing back-quote and run it back through a fresh lexer
	fn read_backquote(&mut self, in_dquote: bool, start: usize) -> RashResult<WordPart> {
		let line = self.line;
		let mut text = String::new();
		loop {
			match self.getc()? {
				Some('`') => break,
				Some('\\') => {
					match self.getc()? {
						Some('\n') => continue,
						Some(next) if "$`\\".contains(next) || (in_dquote && next == '"') => text.push(next),
						Some(next) => {
							text.push('\\');
							text.push(next);
						}
						None => return Err(self.unterminated("back-quoted command", start))
					}
				}
				Some(ch) => text.push(ch),
				None => return Err(self.unterminated("back-quoted command", start))
			}
		}
		let mut sub = Lexer::from_str(&text, line, self.aliases.clone());
		let body = Parser::new(&mut sub).parse_all()?;
		Ok(WordPart::CmdSub(body))
	}

	fn read_raw_line(&mut self) -> RashResult<Option<String>> {
		let mut line = String::new();
		loop {
			match self.getc()? {
				Some('\n') => {
					line.push('\n');
					return Ok(Some(line))
				}
				Some(ch) => line.push(ch),
				None if line.is_empty() => return Ok(None),
				None => return Ok(Some(line))
			}
		}
	}

	fn read_heredocs(&mut self) -> RashResult<()> {
		for req in take(&mut self.pending_heredocs) {
			let start = self.line;
			let mut raw = String::new();
			while let Some(line) = self.read_raw_line()? {
				let line = if req.strip_tabs { line.trim_start_matches('\t').to_string() } else { line };
				if line.strip_suffix('\n').unwrap_or(&line) == req.delim {
					break
				}
				raw.push_str(&line);
			}
			let word = if req.quoted {
				Word::from_parts(raw.clone(), vec![WordPart::SQuote(raw)], start)
			} else {
				let mut sub = Lexer::from_str(&raw, start, self.aliases.clone());
				let parts = sub.read_word_parts(WordCtx::HereDoc)?;
				Word::from_parts(raw, parts, start)
			};
			let _ = req.body.set(word);
		}
		Ok(())
	}
}

fn push_lit(parts: &mut Vec<WordPart>, ch: char) {
	if let Some(WordPart::Lit(text)) = parts.last_mut() {
		text.push(ch);
	} else {
		parts.push(WordPart::Lit(ch.to_string()));
	}
}

fn push_quoted(parts: &mut Vec<WordPart>, ch: char) {
	if let Some(WordPart::Quoted(text)) = parts.last_mut() {
		text.push(ch);
	} else {
		parts.push(WordPart::Quoted(ch.to_string()));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn lex_all(input: &str) -> Vec<TkType> {
		let mut lexer = Lexer::from_str(input, 1, HashMap::new());
		let mut tokens = vec![];
		loop {
			let tk = lexer.next_token().unwrap();
			if tk.tk_type == TkType::Eof {
				break
			}
			tokens.push(tk.tk_type);
		}
		tokens
	}

	fn words(tokens: &[TkType]) -> Vec<String> {
		tokens.iter().filter_map(|tk| match tk {
			TkType::Word(word) => Some(word.literal().unwrap_or(&word.text).to_string()),
			_ => None
		}).collect()
	}

	#[test]
	fn operators_split_words() {
		let tokens = lex_all("a|b&&c;d &");
		assert_eq!(words(&tokens), vec!["a","b","c","d"]);
		assert!(matches!(tokens[1], TkType::Pipe));
		assert!(matches!(tokens[3], TkType::AndIf));
		assert!(matches!(tokens[5], TkType::Semi));
		assert!(matches!(tokens[7], TkType::Amp));
	}

	#[test]
	fn io_number_only_touching_operator() {
		let tokens = lex_all("cmd 2>&1 3 >x");
		assert_eq!(tokens[1], TkType::Redir { fd: Some(2), op: RedirOp::DupOut });
		assert_eq!(words(&tokens), vec!["cmd","1","3","x"]);
		assert_eq!(tokens[4], TkType::Redir { fd: None, op: RedirOp::Output });
	}

	#[test]
	fn quoted_parts_are_structured() {
		let tokens = lex_all(r#"a"b $x"'c d'\e"#);
		let TkType::Word(word) = &tokens[0] else { panic!() };
		assert_eq!(word.parts, vec![
			WordPart::Lit("a".into()),
			WordPart::DQuote(vec![
				WordPart::Lit("b ".into()),
				WordPart::Param(ParamExp::plain("x", true)),
			]),
			WordPart::SQuote("c d".into()),
			WordPart::Quoted("e".into()),
		]);
		assert!(word.is_quoted());
	}

	#[test]
	fn braced_params_parse_operators() {
		let tokens = lex_all("${x:-a b} ${#y} ${z##*/}");
		let TkType::Word(word) = &tokens[0] else { panic!() };
		let [WordPart::Param(param)] = word.parts.as_slice() else { panic!() };
		assert_eq!(param.op, ParamOp::Default);
		assert!(param.colon);
		assert_eq!(param.arg, vec![WordPart::Lit("a b".into())]);

		let TkType::Word(word) = &tokens[1] else { panic!() };
		assert!(matches!(&word.parts[0], WordPart::Param(p) if p.op == ParamOp::Length && p.name == "y"));

		let TkType::Word(word) = &tokens[2] else { panic!() };
		assert!(matches!(&word.parts[0], WordPart::Param(p) if p.op == ParamOp::TrimPrefixLong));
	}

	#[test]
	fn command_substitution_keeps_source_text() {
		let tokens = lex_all("echo $(echo a; echo b)c");
		let TkType::Word(word) = &tokens[1] else { panic!() };
		assert_eq!(word.text, "$(echo a; echo b)c");
		assert!(matches!(word.parts[0], WordPart::CmdSub(Some(_))));
		assert_eq!(word.parts[1], WordPart::Lit("c".into()));
	}

	#[test]
	fn arithmetic_nesting() {
		let tokens = lex_all("$(( (1+2)*x ))");
		let TkType::Word(word) = &tokens[0] else { panic!() };
		assert_eq!(word.parts, vec![WordPart::Arith(vec![WordPart::Lit(" (1+2)*x ".into())])]);
	}

	#[test]
	fn comments_and_continuations() {
		let tokens = lex_all("echo a\\\nb # trailing\n");
		assert_eq!(words(&tokens), vec!["echo","ab"]);
		assert_eq!(tokens.last(), Some(&TkType::Newline));
	}

	#[test]
	fn unterminated_quote_reports_start_line() {
		let mut lexer = Lexer::from_str("echo ok\necho 'open\nmore\n", 1, HashMap::new());
		let err = loop {
			match lexer.next_token() {
				Ok(tk) if tk.tk_type == TkType::Eof => panic!("expected an error"),
				Ok(_) => continue,
				Err(e) => break e
			}
		};
		assert_eq!(err.line(), Some(2));
	}

	#[test]
	fn heredoc_body_is_read_after_newline() {
		let mut lexer = Lexer::from_str("cat <<-EOF; echo after\n\tline $x\n\tEOF\n", 1, HashMap::new());
		let body = Rc::new(OnceCell::new());
		assert!(lexer.next_token().unwrap().is_keyword("cat"));
		assert!(matches!(lexer.next_token().unwrap().tk_type, TkType::Redir { op: RedirOp::HereDocStrip, .. }));
		let delim = lexer.next_token().unwrap();
		assert_eq!(delim.word().unwrap().strip_quotes(), "EOF");
		lexer.queue_heredoc(HereDocReq { delim: "EOF".into(), strip_tabs: true, quoted: false, body: body.clone() });
		assert_eq!(words(&[lexer.next_token().unwrap().tk_type]), Vec::<String>::new());
		assert!(lexer.next_token().unwrap().is_keyword("echo"));
		assert!(lexer.next_token().unwrap().is_keyword("after"));
		assert!(body.get().is_none());
		assert_eq!(lexer.next_token().unwrap().tk_type, TkType::Newline);
		let word = body.get().unwrap();
		assert_eq!(word.parts, vec![
			WordPart::Lit("line ".into()),
			WordPart::Param(ParamExp::plain("x", true)),
			WordPart::Lit("\n".into()),
		]);
		assert_eq!(lexer.next_token().unwrap().tk_type, TkType::Eof);
	}

	#[test]
	fn strip_quotes_for_delimiters() {
		let tokens = lex_all(r#"'E'"O"\F"#);
		let TkType::Word(word) = &tokens[0] else { panic!() };
		assert_eq!(word.strip_quotes(), "EOF");
	}
}
