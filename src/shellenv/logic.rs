use std::collections::BTreeMap;

use log::debug;

use crate::interp::parse::Node;
use crate::prelude::*;

/// Functions, aliases and the command hash
#[derive(Debug,Clone,Default)]
pub struct LogicTable {
	functions: HashMap<String,Rc<Node>>,
	aliases: HashMap<String,String>,
	hash: BTreeMap<String,PathBuf>,
}

impl LogicTable {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get_func(&self, name: &str) -> Option<Rc<Node>> {
		self.functions.get(name).cloned()
	}

	pub fn set_func(&mut self, name: &str, body: Rc<Node>) {
		debug!("defining function {name}");
		self.functions.insert(name.to_string(), body);
	}

	pub fn remove_func(&mut self, name: &str) -> Option<Rc<Node>> {
		self.functions.remove(name)
	}

	pub fn get_alias(&self, name: &str) -> Option<&str> {
		self.aliases.get(name).map(|s| s.as_str())
	}

	pub fn set_alias(&mut self, name: &str, value: &str) {
		self.aliases.insert(name.to_string(), value.to_string());
	}

	pub fn remove_alias(&mut self, name: &str) -> Option<String> {
		self.aliases.remove(name)
	}

	pub fn clear_aliases(&mut self) {
		self.aliases.clear();
	}

	pub fn aliases(&self) -> &HashMap<String,String> {
		&self.aliases
	}

	pub fn sorted_aliases(&self) -> BTreeMap<&str,&str> {
		self.aliases.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
	}

	pub fn get_hashed(&self, cmd: &str) -> Option<&Path> {
		self.hash.get(cmd).map(|path| path.as_path())
	}

	pub fn hash_cmd(&mut self, cmd: &str, path: PathBuf) {
		self.hash.insert(cmd.to_string(), path);
	}

	pub fn unhash(&mut self, cmd: &str) {
		self.hash.remove(cmd);
	}

	pub fn clear_hash(&mut self) {
		self.hash.clear();
	}

	/// Entries found through a relative PATH element stop being valid once the directory changes
	pub fn forget_relative(&mut self) {
		self.hash.retain(|_, path| path.is_absolute());
	}

	pub fn hashed(&self) -> &BTreeMap<String,PathBuf> {
		&self.hash
	}
}
