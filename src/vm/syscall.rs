use std::process::Command;

use tracing::{debug, info};

use super::{Callable, Core, Flow, Instruction, IoSink, ObjectTable, Op, Program, VmError, VmResult, STDOUT};
use crate::value::Value;

/// Syscall numbers, carried in operand `a` of `SYSCALL`. Arguments are read
/// from the builtin slots R[0..]; the outcome lands in Result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum Syscall {
    IoFlush = 1,
    SetFuncReturn = 2,
    StrLen = 3,
    SubStr = 4,
    StrIndex = 5,
    StrReplace = 6,
    RegExp = 7,
    ArrMake = 8,
    ArrPush = 9,
    ArrSet = 10,
    ArrGet = 11,
    ArrLen = 12,
    GetEnv = 13,
    Exec = 14,
    GetOsType = 15,
}

impl TryFrom<i64> for Syscall {
    type Error = VmError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        Ok(match code {
            1 => Syscall::IoFlush,
            2 => Syscall::SetFuncReturn,
            3 => Syscall::StrLen,
            4 => Syscall::SubStr,
            5 => Syscall::StrIndex,
            6 => Syscall::StrReplace,
            7 => Syscall::RegExp,
            8 => Syscall::ArrMake,
            9 => Syscall::ArrPush,
            10 => Syscall::ArrSet,
            11 => Syscall::ArrGet,
            12 => Syscall::ArrLen,
            13 => Syscall::GetEnv,
            14 => Syscall::Exec,
            15 => Syscall::GetOsType,
            _ => return Err(VmError::UnknownSyscall { code }),
        })
    }
}

impl Syscall {
    pub fn immediate(self) -> Value {
        Value::Integer(self as i64)
    }
}

fn fault(call: Syscall, message: impl Into<String>) -> VmError {
    VmError::Syscall { code: call as i64, message: message.into() }
}

fn string_arg<S>(core: &Core<S>, call: Syscall, slot: usize) -> VmResult<String> {
    match core.reg.get(slot) {
        Value::String(s) => Ok(s.clone()),
        other => Err(fault(call, format!("argument {} must be a string, got {}", slot + 1, other.type_name()))),
    }
}

fn int_arg<S>(core: &Core<S>, call: Syscall, slot: usize) -> VmResult<i64> {
    match core.reg.get(slot) {
        Value::Integer(i) => Ok(*i),
        other => Err(fault(call, format!("argument {} must be an integer, got {}", slot + 1, other.type_name()))),
    }
}

fn checked_index(name: &str, index: i64, len: usize) -> VmResult<usize> {
    if index < 0 || index as usize >= len {
        return Err(VmError::IndexOutOfRange { name: name.to_string(), index, len });
    }
    Ok(index as usize)
}

pub(crate) fn dispatch<S: IoSink>(core: &mut Core<S>, code: i64) -> VmResult<Flow> {
    let call = Syscall::try_from(code)?;
    debug!(?call, "syscall");

    let result = match call {
        Syscall::IoFlush => {
            if let Some(value) = core.mem.take_scalar(STDOUT) {
                core.io.write(&value);
            }
            core.io.flush()?;
            return Ok(Flow::Next);
        }
        Syscall::SetFuncReturn => {
            let name = string_arg(core, call, 0)?;
            let value = core.reg.get(1).clone();
            core.reg.set_result(Value::Boolean(true));
            return Ok(Flow::Patch { name, value });
        }
        Syscall::StrLen => {
            let s = string_arg(core, call, 0)?;
            Value::Integer(s.chars().count() as i64)
        }
        Syscall::SubStr => {
            let s = string_arg(core, call, 0)?;
            let (start, len) = (int_arg(core, call, 1)?, int_arg(core, call, 2)?);
            let total = s.chars().count() as i64;
            if start < 0 || len < 0 || start.checked_add(len).is_none_or(|end| end > total) {
                return Err(fault(call, format!("range {}+{} outside string of length {}", start, len, total)));
            }
            Value::String(s.chars().skip(start as usize).take(len as usize).collect())
        }
        Syscall::StrIndex => {
            let s = string_arg(core, call, 0)?;
            let needle = string_arg(core, call, 1)?;
            let index = s.find(&needle).map(|byte| s[..byte].chars().count() as i64).unwrap_or(-1);
            Value::Integer(index)
        }
        Syscall::StrReplace => {
            let s = string_arg(core, call, 0)?;
            let from = string_arg(core, call, 1)?;
            let to = string_arg(core, call, 2)?;
            if from.is_empty() {
                return Err(fault(call, "cannot replace an empty string"));
            }
            Value::String(s.replace(&from, &to))
        }
        Syscall::RegExp => {
            let s = string_arg(core, call, 0)?;
            let pattern = string_arg(core, call, 1)?;
            if !core.regex_cache.contains_key(&pattern) {
                let re = regex::Regex::new(&pattern).map_err(|e| fault(call, e.to_string()))?;
                core.regex_cache.insert(pattern.clone(), re);
            }
            let re = &core.regex_cache[&pattern];
            let found = re.captures(&s).and_then(|caps| caps.get(1).or_else(|| caps.get(0)));
            Value::String(found.map(|m| m.as_str().to_string()).unwrap_or_default())
        }
        Syscall::ArrMake => {
            let name = string_arg(core, call, 0)?;
            core.mem.make_array(&name);
            Value::Boolean(true)
        }
        Syscall::ArrPush => {
            let name = string_arg(core, call, 0)?;
            let value = core.reg.get(1).clone();
            Value::Integer(core.mem.push_array(&name, value) as i64)
        }
        Syscall::ArrSet => {
            let name = string_arg(core, call, 0)?;
            let index = int_arg(core, call, 1)?;
            let value = core.reg.get(2).clone();
            let items = core.mem.array_mut(&name)?;
            let i = checked_index(&name, index, items.len())?;
            items[i] = value.clone();
            value
        }
        Syscall::ArrGet => {
            let name = string_arg(core, call, 0)?;
            let index = int_arg(core, call, 1)?;
            let items = core.mem.array(&name)?;
            let i = checked_index(&name, index, items.len())?;
            items[i].clone()
        }
        Syscall::ArrLen => {
            let name = string_arg(core, call, 0)?;
            Value::Integer(core.mem.array(&name)?.len() as i64)
        }
        Syscall::GetEnv => {
            let key = string_arg(core, call, 0)?;
            Value::String(std::env::var(&key).unwrap_or_default())
        }
        Syscall::Exec => {
            let command = string_arg(core, call, 0)?;
            Value::String(run_command(&command).map_err(|e| fault(call, format!("{}: {}", command, e)))?)
        }
        Syscall::GetOsType => Value::String(std::env::consts::OS.to_string()),
    };

    core.reg.set_result(result);
    Ok(Flow::Next)
}

fn run_command(command: &str) -> std::io::Result<String> {
    let output = if cfg!(windows) {
        Command::new("cmd").args(["/C", command]).output()?
    } else {
        Command::new("sh").args(["-c", command]).output()?
    };
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Rewrites a zero-parameter function so it returns `value`. The three
/// instructions at the recorded entry point are overwritten in place; nothing
/// checks whether the function is on the call stack right now.
pub(crate) fn self_patch(program: &mut Program, mem: &ObjectTable, name: &str, value: Value) -> VmResult<()> {
    let patch_error = |message: &str| VmError::Patch { name: name.to_string(), message: message.to_string() };

    let (entry, end) = match mem.function(name)? {
        Callable::UserDefined { params, .. } if !params.is_empty() => {
            return Err(patch_error("only functions without parameters can be redefined"));
        }
        Callable::UserDefined { entry, end, .. } => (*entry, *end),
        Callable::Builtin { .. } => return Err(patch_error("builtins cannot be redefined")),
    };
    if end < entry + 2 {
        return Err(patch_error("function body too short to patch"));
    }

    let replacement = [
        Instruction::ab(Op::RegSet, super::r(0), value),
        Instruction::a(Op::RslSet, super::r(0)),
        Instruction::new(Op::Return),
    ];
    for (offset, inst) in replacement.into_iter().enumerate() {
        program.code[entry + offset] = inst;
    }
    info!(function = name, entry, "redefined");
    Ok(())
}
