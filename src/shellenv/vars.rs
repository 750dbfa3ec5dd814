use std::collections::BTreeMap;

use log::{debug, trace};

use crate::utils::{decode_os, to_cstring};
use crate::prelude::*;

bitflags! {
	#[derive(Debug,Clone,Copy,PartialEq,Eq,Default)]
	pub struct VarFlags: u8 {
		const EXPORT   = 0b0001;
		const READONLY = 0b0010;
	}
}

/// A shell variable. `value` is `None` for a name that carries flags
/// (`export x`, `readonly y`) but has never been given a value.
#[derive(Debug,Clone,PartialEq,Default)]
pub struct Var {
	value: Option<String>,
	flags: VarFlags
}

impl Var {
	pub fn new(value: Option<String>, flags: VarFlags) -> Self {
		Self { value, flags }
	}
	pub fn value(&self) -> Option<&str> {
		self.value.as_deref()
	}
	pub fn flags(&self) -> VarFlags {
		self.flags
	}
	pub fn is_exported(&self) -> bool {
		self.flags.contains(VarFlags::EXPORT)
	}
	pub fn is_readonly(&self) -> bool {
		self.flags.contains(VarFlags::READONLY)
	}
}

/// What a name looked like before `local` shadowed it
#[derive(Debug,Clone)]
struct Saved {
	name: String,
	prior: Option<Var>
}

#[derive(Debug,Clone,Default)]
pub struct VarTable {
	vars: HashMap<String,Var>,
	params: Vec<String>,
	local_frames: Vec<Vec<Saved>>,
}

impl VarTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Seed the table from the process environment. Everything imported is exported.
	pub fn from_env() -> Self {
		let mut table = Self::new();
		for (key, value) in env::vars_os() {
			let (key, value) = (decode_os(&key), decode_os(&value));
			if key.is_valid_name() {
				table.vars.insert(key, Var::new(Some(value), VarFlags::EXPORT));
			}
		}
		table
	}

	pub fn get_var(&self, name: &str) -> Option<&str> {
		self.vars.get(name).and_then(|var| var.value())
	}

	pub fn get(&self, name: &str) -> Option<&Var> {
		self.vars.get(name)
	}

	pub fn is_readonly(&self, name: &str) -> bool {
		self.vars.get(name).is_some_and(|var| var.is_readonly())
	}

	/// Assign a value, keeping whatever flags the name already has
	pub fn set_var(&mut self, name: &str, value: &str) -> RashResult<()> {
		self.set_var_flags(name, Some(value), VarFlags::empty())
	}

	/// Assign and/or add flags. A `None` value leaves the current value alone.
	pub fn set_var_flags(&mut self, name: &str, value: Option<&str>, flags: VarFlags) -> RashResult<()> {
		let var = self.vars.entry(name.to_string()).or_default();
		if value.is_some() && var.is_readonly() {
			return Err(Low(RashErrLow::ReadOnly(name.to_string())))
		}
		if let Some(value) = value {
			trace!("set {name}={value}");
			var.value = Some(value.to_string());
		}
		var.flags |= flags;
		Ok(())
	}

	pub fn export_var(&mut self, name: &str, value: &str) -> RashResult<()> {
		self.set_var_flags(name, Some(value), VarFlags::EXPORT)
	}

	pub fn unset_var(&mut self, name: &str) -> RashResult<()> {
		if self.is_readonly(name) {
			return Err(Low(RashErrLow::ReadOnly(name.to_string())))
		}
		self.vars.remove(name);
		Ok(())
	}

	/// Drop the export flag, keeping the value
	pub fn unexport_var(&mut self, name: &str) {
		if let Some(var) = self.vars.get_mut(name) {
			var.flags.remove(VarFlags::EXPORT);
		}
	}

	/// All variables in name order, for `set`, `export -p` and `readonly -p`
	pub fn sorted(&self) -> BTreeMap<&str,&Var> {
		self.vars.iter().map(|(name, var)| (name.as_str(), var)).collect()
	}

	/// `NAME=value` for every exported variable that has a value
	pub fn envp(&self) -> Vec<CString> {
		self.vars.iter()
			.filter(|(_, var)| var.is_exported())
			.filter_map(|(name, var)| var.value().map(|value| format!("{name}={value}")))
			.map(|pair| to_cstring(&pair))
			.collect()
	}

	pub fn push_local_frame(&mut self) {
		self.local_frames.push(vec![]);
	}

	/// Put every name shadowed in the newest frame back the way it was, newest first
	pub fn pop_local_frame(&mut self) {
		let Some(frame) = self.local_frames.pop() else { return };
		for saved in frame.into_iter().rev() {
			debug!("restoring {} after local scope", saved.name);
			match saved.prior {
				Some(var) => { self.vars.insert(saved.name, var); }
				None => { self.vars.remove(&saved.name); }
			}
		}
	}

	pub fn in_local_scope(&self) -> bool {
		!self.local_frames.is_empty()
	}

	/// Shadow `name` for the rest of the current frame. The variable keeps its
	/// current value and flags until something assigns to it.
	pub fn mark_local(&mut self, name: &str) -> RashResult<()> {
		let prior = self.vars.get(name).cloned();
		let Some(frame) = self.local_frames.last_mut() else {
			return Err(RashErr::exec("not in a function"))
		};
		if frame.iter().any(|saved| saved.name == name) {
			return Ok(())
		}
		frame.push(Saved { name: name.to_string(), prior });
		Ok(())
	}

	pub fn params(&self) -> &[String] {
		&self.params
	}

	/// `$1` is index 1
	pub fn get_param(&self, index: usize) -> Option<&str> {
		index.checked_sub(1).and_then(|i| self.params.get(i)).map(|s| s.as_str())
	}

	pub fn set_params(&mut self, params: Vec<String>) {
		self.params = params;
	}

	/// Install a new set of positional parameters, handing back the old ones
	pub fn swap_params(&mut self, params: Vec<String>) -> Vec<String> {
		std::mem::replace(&mut self.params, params)
	}

	pub fn shift_params(&mut self, count: usize) -> bool {
		if count > self.params.len() {
			return false
		}
		self.params.drain(..count);
		true
	}
}
