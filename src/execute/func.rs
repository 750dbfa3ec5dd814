use log::trace;

use crate::execute::{eval_node, redir, ExecFlags};
use crate::interp::parse::{Node, Redir};
use crate::shellenv::vars::VarFlags;
use crate::prelude::*;

/// Call a shell function. The caller's positional parameters, loop nesting and any
/// names made `local` inside the body are all put back afterwards, however the body ends.
/// A call whose status is being tested keeps `set -e` off inside the body.
pub fn call_function(
	rash: &mut Rash,
	body: Rc<Node>,
	args: &[String],
	vars: Vec<(String,String)>,
	redirs: &[Redir],
	flags: ExecFlags
) -> RashResult<()> {
	let body_flags = flags & ExecFlags::TESTED;
	redir::with_redirs(rash, redirs, |rash| {
		rash.vars_mut().push_local_frame();
		let saved_params = rash.vars_mut().swap_params(args[1..].to_vec());
		let saved_loops = std::mem::take(&mut rash.meta_mut().loop_depth);
		rash.meta_mut().func_depth += 1;

		let result = (|| -> RashResult<()> {
			for (name, value) in &vars {
				rash.vars_mut().mark_local(name)?;
				rash.vars_mut().set_var_flags(name, Some(value), VarFlags::EXPORT)?;
			}
			eval_node(rash, &body, body_flags)
		})();

		rash.meta_mut().func_depth -= 1;
		rash.meta_mut().loop_depth = saved_loops;
		rash.vars_mut().swap_params(saved_params);
		rash.vars_mut().pop_local_frame();

		match result {
			Err(e) => match e.low() {
				RashErrLow::FuncReturn(code) => {
					trace!("{} returned {code}", args[0]);
					rash.set_code(*code);
					Ok(())
				}
				_ => Err(e)
			}
			Ok(()) => Ok(())
		}
	})
}

#[cfg(test)]
mod tests {
	use crate::interpret::eval_string;
	use crate::prelude::*;

	#[test]
	fn params_are_scoped() {
		let mut rash = Rash::new();
		rash.vars_mut().set_params(vec!["outer".into()]);
		eval_string(&mut rash, "f() { inner=$1:$#; }; f a b c").unwrap();
		assert_eq!(rash.get_var("inner"), Some("a:3"));
		assert_eq!(rash.vars().params(), &["outer".to_string()]);
	}

	#[test]
	fn locals_are_restored() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "x=global; f() { local x=inner; seen=$x; }; f").unwrap();
		assert_eq!(rash.get_var("seen"), Some("inner"));
		assert_eq!(rash.get_var("x"), Some("global"));
	}

	#[test]
	fn return_sets_status() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "f() { return 7; echo unreachable; }; f").unwrap();
		assert_eq!(rash.get_status(), 7);
		assert_eq!(rash.meta().func_depth, 0);
	}

	#[test]
	fn tested_calls_ignore_errexit() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "f() { false; reached=yes; }; set -e; f || true; if f; then :; fi").unwrap();
		assert_eq!(rash.get_var("reached"), Some("yes"));

		let mut rash = Rash::new();
		let result = eval_string(&mut rash, "f() { false; reached=yes; }; set -e; f");
		assert!(matches!(result.map_err(|e| e.into_low()), Err(RashErrLow::CleanExit(1))));
		assert_eq!(rash.get_var("reached"), None);
	}

	#[test]
	fn recursion() {
		let mut rash = Rash::new();
		eval_string(&mut rash, "count() { [ $1 -le 0 ] && return 0; n=$((n+1)); count $(($1-1)); }; n=0; count 5").unwrap();
		assert_eq!(rash.get_var("n"), Some("5"));
	}
}
