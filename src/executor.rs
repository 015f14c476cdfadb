//! The fetch/decode/dispatch loop (spec §4.8) and the opcode handler tables
//! (spec §4.7). This module is the behavioral heart of the machine: it reads
//! one [`Instruction`] at the program counter, mutates [`Machine`] state, and
//! either continues, suspends for input, or halts.
//!
//! Suspension is explicit, not exception-based (spec §9 "Suspendable
//! execution"): a handler that needs a line of text or a keystroke records
//! what it's waiting for in `Machine::state` and returns. The caller
//! ([`Machine::run`] or an embedder driving `step`/`resume` directly) is the
//! only thing that talks to a human.

use log::{debug, warn};

use crate::config::OpcodePolicy;
use crate::cpu::MAX_LOCALS;
use crate::dictionary;
use crate::error::{VmError, VmResult};
use crate::input::{InputEvent, InputRequest};
use crate::instruction::{Instruction, InstructionForm, OperandCount, OperandType};
use crate::machine::{Machine, MachineState, PendingInput};
use crate::object;
use crate::screen::Screen;
use crate::storage::Storage;

/// What happened after dispatching one instruction.
#[derive(Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Suspended,
    Halted,
}

fn to_i16(u: u16) -> i16 {
    u as i16
}

fn to_u16(i: i16) -> u16 {
    i as u16
}

/// Run one fetch/decode/dispatch cycle. Must only be called while
/// `machine.state == Running`.
pub fn step(machine: &mut Machine, screen: &mut dyn Screen, storage: &mut dyn Storage) -> VmResult<StepOutcome> {
    let pc = machine.cpu.pc;
    let version = machine.memory.header.version;
    let inst = Instruction::decode(machine.memory.raw(), pc as usize, version)
        .map_err(|reason| VmError::DecodeError { pc, reason })?;
    machine.cpu.pc = pc + inst.size as u32;

    let operands = resolve_operands(machine, &inst)?;
    dispatch(machine, &inst, &operands, screen, storage)
}

/// Resolve each operand's *value* (a Variable operand reads through the
/// variable-addressing rules; constants pass through unchanged).
fn resolve_operands(machine: &mut Machine, inst: &Instruction) -> VmResult<Vec<u16>> {
    let mut values = Vec::with_capacity(inst.operands.len());
    for (i, &raw) in inst.operands.iter().enumerate() {
        let value = match inst.operand_types[i] {
            OperandType::Variable => machine.cpu.read_variable(&machine.memory, raw as u8)?,
            _ => raw,
        };
        values.push(value);
    }
    Ok(values)
}

fn store(machine: &mut Machine, inst: &Instruction, value: u16) -> VmResult<()> {
    if let Some(var) = inst.store_var {
        machine.cpu.write_variable(&mut machine.memory, var, value)?;
    }
    Ok(())
}

/// Perform (or skip) a conditional branch (spec §4.6). Offsets 0/1 are the
/// special `rfalse`/`rtrue` forms, handled at branch time rather than as a
/// PC delta.
fn do_branch(machine: &mut Machine, inst: &Instruction, condition: bool) -> VmResult<StepOutcome> {
    let Some(branch) = &inst.branch else {
        return Ok(StepOutcome::Continue);
    };
    if condition != branch.on_true {
        return Ok(StepOutcome::Continue);
    }
    match branch.offset {
        0 => do_return(machine, 0),
        1 => do_return(machine, 1),
        offset => {
            machine.cpu.pc = (machine.cpu.pc as i64 + offset as i64 - 2) as u32;
            Ok(StepOutcome::Continue)
        }
    }
}

/// `ret`/`rtrue`/`rfalse`/`ret_popped` (spec §4.5): pop the current frame,
/// deliver `value` to its recorded destination, resume at its return PC.
fn do_return(machine: &mut Machine, value: u16) -> VmResult<StepOutcome> {
    let frame = machine.cpu.pop_frame()?;
    if let Some(var) = frame.return_store {
        machine.cpu.write_variable(&mut machine.memory, var, value)?;
    }
    machine.cpu.pc = frame.return_pc;
    Ok(StepOutcome::Continue)
}

/// `call`/`call_1s`.../`call_vn2` (spec §4.5). `routine_packed == 0` is a
/// no-op: for a storing form it writes 0, for a non-storing form it does
/// nothing at all — the caller's PC has already moved past the call.
fn do_call(
    machine: &mut Machine,
    inst: &Instruction,
    routine_packed: u16,
    args: &[u16],
    discard_result: bool,
) -> VmResult<StepOutcome> {
    if routine_packed == 0 {
        if !discard_result {
            store(machine, inst, 0)?;
        }
        return Ok(StepOutcome::Continue);
    }

    let byte_addr = machine.memory.unpack_routine(routine_packed);
    if !machine.memory.is_valid_routine(byte_addr) {
        return Err(VmError::InvalidAddress {
            addr: byte_addr,
            size: machine.memory.len(),
        });
    }
    let num_locals = machine.memory.validate_routine_header(byte_addr)?;

    let mut locals = [0u16; MAX_LOCALS];
    let mut code_start = byte_addr + 1;
    if machine.memory.header.version <= 4 {
        for slot in locals.iter_mut().take(num_locals as usize) {
            *slot = machine.memory.get_word(code_start)?;
            code_start += 2;
        }
    }
    for (i, &arg) in args.iter().take(num_locals as usize).enumerate() {
        locals[i] = arg;
    }

    let return_store = if discard_result { None } else { inst.store_var };
    let arg_count = args.len().min(255) as u8;
    machine
        .cpu
        .push_frame(machine.cpu.pc, return_store, num_locals, locals, arg_count);
    machine.cpu.pc = code_start;
    Ok(StepOutcome::Continue)
}

fn dispatch(
    machine: &mut Machine,
    inst: &Instruction,
    ops: &[u16],
    screen: &mut dyn Screen,
    storage: &mut dyn Storage,
) -> VmResult<StepOutcome> {
    let version = machine.memory.header.version;
    let name = inst.name(version);
    debug!("{:#06x}: {} {:?}", machine.cpu.pc - inst.size as u32, name, ops);

    match inst.operand_count {
        OperandCount::OP0 => exec_0op(machine, inst, name, screen, storage),
        OperandCount::OP1 => exec_1op(machine, inst, name, ops[0], screen),
        OperandCount::OP2 => exec_2op(machine, inst, name, ops, screen),
        OperandCount::VAR => {
            if inst.form == InstructionForm::Extended {
                exec_ext(machine, inst, name, ops, screen, storage)
            } else {
                exec_var(machine, inst, name, ops, screen, storage)
            }
        }
    }
}

fn unknown_opcode(machine: &mut Machine, inst: &Instruction, name: &'static str) -> VmResult<StepOutcome> {
    match machine.config.unknown_opcode_policy {
        OpcodePolicy::Fatal => Err(VmError::UnknownOpcode {
            pc: machine.cpu.pc,
            opcode: inst.opcode,
            mnemonic: name,
        }),
        OpcodePolicy::PermissiveNoOp => {
            warn!("unimplemented opcode {name} at {:#06x}, treating as no-op", machine.cpu.pc);
            store(machine, inst, 0)?;
            do_branch(machine, inst, false)
        }
    }
}

fn exec_0op(
    machine: &mut Machine,
    inst: &Instruction,
    name: &str,
    screen: &mut dyn Screen,
    storage: &mut dyn Storage,
) -> VmResult<StepOutcome> {
    match name {
        "rtrue" => do_return(machine, 1),
        "rfalse" => do_return(machine, 0),
        "print" => {
            screen.print(inst.text.as_deref().unwrap_or(""))?;
            Ok(StepOutcome::Continue)
        }
        "print_ret" => {
            screen.print(inst.text.as_deref().unwrap_or(""))?;
            screen.print("\n")?;
            do_return(machine, 1)
        }
        "nop" => Ok(StepOutcome::Continue),
        // V3 branches on success; V4 stores the result instead (spec §4.10,
        // §9's 0OP `save`/`restore` note) — `stores_result`/`has_branch`
        // pick the right byte to decode, so dispatch on which one is present.
        "save" => {
            let snapshot = crate::snapshot::take_snapshot(&machine.memory, &machine.cpu);
            let ok = storage.save("autosave", &snapshot).is_ok();
            if inst.store_var.is_some() {
                store(machine, inst, ok as u16)?;
                Ok(StepOutcome::Continue)
            } else {
                do_branch(machine, inst, ok)
            }
        }
        "restore" => {
            let ok = match storage.restore("autosave") {
                Ok(data) => {
                    crate::snapshot::restore_snapshot(&data, &mut machine.memory, &mut machine.cpu).is_ok()
                }
                Err(_) => false,
            };
            if inst.store_var.is_some() {
                store(machine, inst, ok as u16)?;
                Ok(StepOutcome::Continue)
            } else {
                do_branch(machine, inst, ok)
            }
        }
        "restart" => {
            machine.restart();
            Ok(StepOutcome::Continue)
        }
        "ret_popped" => {
            let value = machine.cpu.pop()?;
            do_return(machine, value)
        }
        "pop" => {
            machine.cpu.pop()?;
            Ok(StepOutcome::Continue)
        }
        "catch" => {
            let depth = machine.cpu.call_depth() as u16;
            store(machine, inst, depth)?;
            Ok(StepOutcome::Continue)
        }
        "quit" => Ok(StepOutcome::Halted),
        "new_line" => {
            screen.print("\n")?;
            Ok(StepOutcome::Continue)
        }
        "show_status" => {
            screen.show_status("", 0, 0)?;
            Ok(StepOutcome::Continue)
        }
        "verify" => {
            let ok = machine.memory.verify_checksum() == machine.memory.header.checksum;
            do_branch(machine, inst, ok)
        }
        "piracy" => do_branch(machine, inst, true),
        _ => unknown_opcode(machine, inst, inst.name(machine.memory.header.version)),
    }
}

fn exec_1op(
    machine: &mut Machine,
    inst: &Instruction,
    name: &str,
    a: u16,
    screen: &mut dyn Screen,
) -> VmResult<StepOutcome> {
    match name {
        "jz" => do_branch(machine, inst, a == 0),
        "get_sibling" => {
            let sib = object::get_sibling(&machine.memory, a)?;
            store(machine, inst, sib)?;
            do_branch(machine, inst, sib != 0)
        }
        "get_child" => {
            let child = object::get_child(&machine.memory, a)?;
            store(machine, inst, child)?;
            do_branch(machine, inst, child != 0)
        }
        "get_parent" => {
            let parent = object::get_parent(&machine.memory, a)?;
            store(machine, inst, parent)?;
            Ok(StepOutcome::Continue)
        }
        "get_prop_len" => {
            // `a` is a property *data* address; 0 means "no property".
            if a == 0 {
                store(machine, inst, 0)?;
                return Ok(StepOutcome::Continue);
            }
            let header_byte = machine.memory.get_byte(a as u32 - 1)?;
            let len = if machine.memory.header.version <= 3 {
                ((header_byte >> 5) & 0x07) + 1
            } else if header_byte & 0x80 != 0 {
                let size = header_byte & 0x3F;
                if size == 0 {
                    64
                } else {
                    size
                }
            } else if header_byte & 0x40 != 0 {
                2
            } else {
                1
            };
            store(machine, inst, len as u16)?;
            Ok(StepOutcome::Continue)
        }
        "inc" => {
            let val = to_i16(machine.cpu.read_variable(&machine.memory, a as u8)?);
            machine
                .cpu
                .write_variable(&mut machine.memory, a as u8, to_u16(val.wrapping_add(1)))?;
            Ok(StepOutcome::Continue)
        }
        "dec" => {
            let val = to_i16(machine.cpu.read_variable(&machine.memory, a as u8)?);
            machine
                .cpu
                .write_variable(&mut machine.memory, a as u8, to_u16(val.wrapping_sub(1)))?;
            Ok(StepOutcome::Continue)
        }
        "print_addr" => {
            let (text, _) = machine.memory.get_zstring(a as u32)?;
            screen.print(&text)?;
            Ok(StepOutcome::Continue)
        }
        "call_1s" => do_call(machine, inst, a, &[], false),
        "remove_obj" => {
            object::remove_object(&mut machine.memory, a)?;
            Ok(StepOutcome::Continue)
        }
        "print_obj" => {
            let text = object::object_name(&machine.memory, a)?;
            screen.print(&text)?;
            Ok(StepOutcome::Continue)
        }
        "ret" => do_return(machine, a),
        "jump" => {
            machine.cpu.pc = (machine.cpu.pc as i64 + to_i16(a) as i64 - 2) as u32;
            Ok(StepOutcome::Continue)
        }
        "print_paddr" => {
            let byte_addr = machine.memory.unpack_string(a);
            let (text, _) = machine.memory.get_zstring(byte_addr)?;
            screen.print(&text)?;
            Ok(StepOutcome::Continue)
        }
        "load" => {
            let val = machine.cpu.read_variable(&machine.memory, a as u8)?;
            store(machine, inst, val)?;
            Ok(StepOutcome::Continue)
        }
        "not" | "call_1n" => {
            if machine.memory.header.version >= 5 {
                do_call(machine, inst, a, &[], true)
            } else {
                store(machine, inst, !a)?;
                Ok(StepOutcome::Continue)
            }
        }
        _ => unknown_opcode(machine, inst, inst.name(machine.memory.header.version)),
    }
}

fn exec_2op(
    machine: &mut Machine,
    inst: &Instruction,
    name: &str,
    ops: &[u16],
    screen: &mut dyn Screen,
) -> VmResult<StepOutcome> {
    let a = ops[0];
    let b = *ops.get(1).unwrap_or(&0);
    match name {
        "je" => {
            let hit = ops[1..].iter().any(|&x| x == a);
            do_branch(machine, inst, hit)
        }
        "jl" => do_branch(machine, inst, to_i16(a) < to_i16(b)),
        "jg" => do_branch(machine, inst, to_i16(a) > to_i16(b)),
        "dec_chk" => {
            let val = to_i16(machine.cpu.read_variable(&machine.memory, a as u8)?).wrapping_sub(1);
            machine
                .cpu
                .write_variable(&mut machine.memory, a as u8, to_u16(val))?;
            do_branch(machine, inst, val < to_i16(b))
        }
        "inc_chk" => {
            let val = to_i16(machine.cpu.read_variable(&machine.memory, a as u8)?).wrapping_add(1);
            machine
                .cpu
                .write_variable(&mut machine.memory, a as u8, to_u16(val))?;
            do_branch(machine, inst, val > to_i16(b))
        }
        "jin" => {
            let parent = object::get_parent(&machine.memory, a)?;
            do_branch(machine, inst, parent == b)
        }
        "test" => do_branch(machine, inst, a & b == b),
        "or" => {
            store(machine, inst, a | b)?;
            Ok(StepOutcome::Continue)
        }
        "and" => {
            store(machine, inst, a & b)?;
            Ok(StepOutcome::Continue)
        }
        "test_attr" => {
            let set = object::test_attribute(&machine.memory, a, b as u8)?;
            do_branch(machine, inst, set)
        }
        "set_attr" => {
            object::set_attribute(&mut machine.memory, a, b as u8, true)?;
            Ok(StepOutcome::Continue)
        }
        "clear_attr" => {
            object::set_attribute(&mut machine.memory, a, b as u8, false)?;
            Ok(StepOutcome::Continue)
        }
        "store" => {
            machine.cpu.write_variable(&mut machine.memory, a as u8, b)?;
            Ok(StepOutcome::Continue)
        }
        "insert_obj" => {
            object::insert_object(&mut machine.memory, a, b)?;
            Ok(StepOutcome::Continue)
        }
        "loadw" => {
            let addr = (a as u32).wrapping_add(2u32.wrapping_mul(b as u32)) & 0xFFFF;
            let val = machine.memory.get_word(addr)?;
            store(machine, inst, val)?;
            Ok(StepOutcome::Continue)
        }
        "loadb" => {
            let addr = (a as u32).wrapping_add(b as u32) & 0xFFFF;
            let val = machine.memory.get_byte(addr)? as u16;
            store(machine, inst, val)?;
            Ok(StepOutcome::Continue)
        }
        "get_prop" => {
            let val = object::get_property(&machine.memory, a, b as u8)?;
            store(machine, inst, val)?;
            Ok(StepOutcome::Continue)
        }
        "get_prop_addr" => {
            let addr = object::get_property_addr(&machine.memory, a, b as u8)?;
            store(machine, inst, addr as u16)?;
            Ok(StepOutcome::Continue)
        }
        "get_next_prop" => {
            let next = object::get_next_property(&machine.memory, a, b as u8)?;
            store(machine, inst, next as u16)?;
            Ok(StepOutcome::Continue)
        }
        "add" => {
            store(machine, inst, to_u16(to_i16(a).wrapping_add(to_i16(b))))?;
            Ok(StepOutcome::Continue)
        }
        "sub" => {
            store(machine, inst, to_u16(to_i16(a).wrapping_sub(to_i16(b))))?;
            Ok(StepOutcome::Continue)
        }
        "mul" => {
            store(machine, inst, to_u16(to_i16(a).wrapping_mul(to_i16(b))))?;
            Ok(StepOutcome::Continue)
        }
        "div" => {
            if b == 0 {
                return Err(VmError::DivideByZero { pc: machine.cpu.pc });
            }
            store(machine, inst, to_u16(to_i16(a).wrapping_div(to_i16(b))))?;
            Ok(StepOutcome::Continue)
        }
        "mod" => {
            if b == 0 {
                return Err(VmError::DivideByZero { pc: machine.cpu.pc });
            }
            store(machine, inst, to_u16(to_i16(a).wrapping_rem(to_i16(b))))?;
            Ok(StepOutcome::Continue)
        }
        "call_2s" => do_call(machine, inst, a, &[b], false),
        "call_2n" => do_call(machine, inst, a, &[b], true),
        "set_colour" => {
            screen.set_colour(a, b)?;
            Ok(StepOutcome::Continue)
        }
        "throw" => {
            let target_depth = b;
            let current_depth = machine.cpu.call_depth() as u16;
            if target_depth == 0 || target_depth > current_depth {
                return Err(VmError::InvalidThrowFrame {
                    target: target_depth,
                    depth: current_depth,
                });
            }
            while machine.cpu.call_depth() as u16 > target_depth {
                machine.cpu.pop_frame()?;
            }
            do_return(machine, a)
        }
        _ => unknown_opcode(machine, inst, inst.name(machine.memory.header.version)),
    }
}

fn exec_var(
    machine: &mut Machine,
    inst: &Instruction,
    name: &str,
    ops: &[u16],
    screen: &mut dyn Screen,
    storage: &mut dyn Storage,
) -> VmResult<StepOutcome> {
    match name {
        "call" | "call_vs" => do_call(machine, inst, ops[0], &ops[1..], false),
        "call_vn" => do_call(machine, inst, ops[0], &ops[1..], true),
        "call_vs2" => do_call(machine, inst, ops[0], &ops[1..], false),
        "call_vn2" => do_call(machine, inst, ops[0], &ops[1..], true),
        "storew" => {
            let addr = (ops[0] as u32).wrapping_add(2u32.wrapping_mul(ops[1] as u32)) & 0xFFFF;
            machine.memory.set_word(addr, ops[2])?;
            Ok(StepOutcome::Continue)
        }
        "storeb" => {
            let addr = (ops[0] as u32).wrapping_add(ops[1] as u32) & 0xFFFF;
            machine.memory.set_byte(addr, ops[2] as u8)?;
            Ok(StepOutcome::Continue)
        }
        "put_prop" => {
            object::put_property(&mut machine.memory, ops[0], ops[1] as u8, ops[2])?;
            Ok(StepOutcome::Continue)
        }
        "sread" | "aread" => start_sread(machine, inst, ops),
        "print_char" => {
            screen.print_char(machine.memory.zscii_to_unicode(ops[0]))?;
            Ok(StepOutcome::Continue)
        }
        "print_num" => {
            screen.print(&to_i16(ops[0]).to_string())?;
            Ok(StepOutcome::Continue)
        }
        "random" => {
            let val = machine.rng.random(to_i16(ops[0]));
            store(machine, inst, val)?;
            Ok(StepOutcome::Continue)
        }
        "push" => {
            machine.cpu.push(ops[0])?;
            Ok(StepOutcome::Continue)
        }
        "pull" => {
            let val = machine.cpu.pop()?;
            if let Some(var) = inst.store_var.or(Some(ops[0] as u8)) {
                // `pull` writes through its one operand rather than a store
                // byte in V1-5; V6 variants use a user stack not modeled here.
                machine.cpu.write_variable(&mut machine.memory, var, val)?;
            }
            Ok(StepOutcome::Continue)
        }
        "split_window" => {
            screen.split_window(ops[0])?;
            Ok(StepOutcome::Continue)
        }
        "set_window" => {
            screen.set_window(ops[0] as u8)?;
            Ok(StepOutcome::Continue)
        }
        "erase_window" => {
            screen.erase_window(to_i16(ops[0]))?;
            Ok(StepOutcome::Continue)
        }
        "erase_line" => {
            screen.erase_line()?;
            Ok(StepOutcome::Continue)
        }
        "set_cursor" => {
            let line = to_i16(ops[0]);
            if line < 0 {
                if machine.memory.header.version != 6 {
                    warn!("set_cursor({line}) (hide/show) ignored outside V6");
                }
                return Ok(StepOutcome::Continue);
            }
            screen.set_cursor(ops[0], *ops.get(1).unwrap_or(&1))?;
            Ok(StepOutcome::Continue)
        }
        "get_cursor" => {
            let (line, col) = screen.get_cursor()?;
            machine.memory.set_word(ops[0] as u32, line)?;
            machine.memory.set_word(ops[0] as u32 + 2, col)?;
            Ok(StepOutcome::Continue)
        }
        "set_text_style" => {
            screen.set_text_style(ops[0])?;
            Ok(StepOutcome::Continue)
        }
        "buffer_mode" => {
            screen.set_buffer_mode(ops[0] != 0)?;
            Ok(StepOutcome::Continue)
        }
        "output_stream" | "input_stream" | "sound_effect" => Ok(StepOutcome::Continue),
        "read_char" => start_read_char(machine, inst, ops),
        "scan_table" => {
            let (addr, found) = scan_table(machine, ops)?;
            store(machine, inst, addr)?;
            do_branch(machine, inst, found)
        }
        "not" => {
            store(machine, inst, !ops[0])?;
            Ok(StepOutcome::Continue)
        }
        "tokenise" => {
            do_tokenise(machine, ops)?;
            Ok(StepOutcome::Continue)
        }
        "encode_text" => Ok(StepOutcome::Continue),
        "copy_table" => {
            do_copy_table(machine, ops)?;
            Ok(StepOutcome::Continue)
        }
        "print_table" => {
            do_print_table(machine, ops, screen)?;
            Ok(StepOutcome::Continue)
        }
        "check_arg_count" => {
            let frame = machine.cpu.current_frame()?;
            let supplied = frame.arg_count;
            do_branch(machine, inst, ops[0] as u8 <= supplied)
        }
        _ => unknown_opcode(machine, inst, inst.name(machine.memory.header.version)),
    }
}

fn exec_ext(
    machine: &mut Machine,
    inst: &Instruction,
    name: &str,
    ops: &[u16],
    screen: &mut dyn Screen,
    storage: &mut dyn Storage,
) -> VmResult<StepOutcome> {
    match name {
        // V5+ table forms of `save`/`restore` (distinct from the V1-4 0OP
        // forms, which branch rather than store). Presence of the
        // table/bytes operands selects the auxiliary-memory variant over a
        // full snapshot (spec §4.10).
        "save" => {
            let result = if ops.len() >= 2 {
                let table = ops[0] as u32;
                let len = ops[1] as usize;
                let data = machine.memory.get_bytes(table, len)?.to_vec();
                storage.save_aux("auxsave", &data).is_ok()
            } else {
                let snapshot = crate::snapshot::take_snapshot(&machine.memory, &machine.cpu);
                storage.save("autosave", &snapshot).is_ok()
            };
            store(machine, inst, result as u16)?;
            Ok(StepOutcome::Continue)
        }
        "restore" => {
            let result = if ops.len() >= 2 {
                let table = ops[0] as u32;
                let len = ops[1] as usize;
                match storage.restore_aux("auxsave") {
                    Ok(data) => {
                        let n = data.len().min(len);
                        machine.memory.set_bytes(table, &data[..n]).is_ok()
                    }
                    Err(_) => false,
                }
            } else {
                match storage.restore("autosave") {
                    Ok(data) => {
                        crate::snapshot::restore_snapshot(&data, &mut machine.memory, &mut machine.cpu).is_ok()
                    }
                    Err(_) => false,
                }
            };
            store(machine, inst, if result { 2 } else { 0 })?;
            Ok(StepOutcome::Continue)
        }
        "save_undo" => {
            let snapshot = crate::snapshot::take_snapshot(&machine.memory, &machine.cpu);
            machine.undo.push(snapshot);
            store(machine, inst, 1)?;
            Ok(StepOutcome::Continue)
        }
        "restore_undo" => match machine.undo.pop() {
            Some(data) => {
                crate::snapshot::restore_snapshot(&data, &mut machine.memory, &mut machine.cpu)?;
                store(machine, inst, 2)?;
                Ok(StepOutcome::Continue)
            }
            None => {
                store(machine, inst, 0)?;
                Ok(StepOutcome::Continue)
            }
        },
        "log_shift" => {
            let shift = to_i16(ops[1]);
            let val = if shift >= 0 {
                (ops[0] as u32) << shift.min(16)
            } else {
                (ops[0] as u32) >> (-shift).min(16)
            };
            store(machine, inst, val as u16)?;
            Ok(StepOutcome::Continue)
        }
        "art_shift" => {
            let shift = to_i16(ops[1]);
            let val = if shift >= 0 {
                to_i16(ops[0]).wrapping_shl(shift.min(16) as u32)
            } else {
                to_i16(ops[0]).wrapping_shr((-shift).min(16) as u32)
            };
            store(machine, inst, to_u16(val))?;
            Ok(StepOutcome::Continue)
        }
        "set_font" => {
            store(machine, inst, 0)?;
            Ok(StepOutcome::Continue)
        }
        "print_unicode" => {
            screen.print_char(char::from_u32(ops[0] as u32).unwrap_or('?'))?;
            Ok(StepOutcome::Continue)
        }
        "check_unicode" => {
            store(machine, inst, 3)?;
            Ok(StepOutcome::Continue)
        }
        // True-colour variant of `set_colour`; the third (window) operand
        // is V6-only and irrelevant to the single-window screen model here.
        "set_true_colour" => {
            screen.set_colour(ops[0], ops[1])?;
            Ok(StepOutcome::Continue)
        }
        // V6-only windowing/mouse opcodes: pixel-accurate V6 is an explicit
        // non-goal (spec §1), so these honor their storing/branching
        // contract without implementing real windowing.
        "draw_picture" | "picture_data" | "erase_picture" | "set_margins" | "move_window"
        | "window_size" | "window_style" | "scroll_window" | "read_mouse" | "mouse_window"
        | "push_stack" | "pop_stack" | "put_wind_prop" | "print_form" | "make_menu"
        | "picture_table" | "buffer_screen" => {
            if inst.store_var.is_some() {
                store(machine, inst, 0)?;
            }
            do_branch(machine, inst, false)
        }
        "get_wind_prop" => {
            store(machine, inst, 0)?;
            Ok(StepOutcome::Continue)
        }
        _ => unknown_opcode(machine, inst, inst.name(machine.memory.header.version)),
    }
}

/// `scan_table` (spec §4.7): `form`'s low 7 bits are the element stride,
/// bit 7 selects word- vs byte-sized elements.
fn scan_table(machine: &Machine, ops: &[u16]) -> VmResult<(u16, bool)> {
    let value = ops[0];
    let table = ops[1] as u32;
    let len = ops[2];
    let form = *ops.get(3).unwrap_or(&0x82);
    let stride = (form & 0x7F).max(1) as u32;
    let word_mode = form & 0x80 != 0;
    for i in 0..len as u32 {
        let addr = table + i * stride;
        let candidate = if word_mode {
            machine.memory.get_word(addr)?
        } else {
            machine.memory.get_byte(addr)? as u16
        };
        if candidate == value {
            return Ok((addr as u16, true));
        }
    }
    Ok((0, false))
}

/// `copy_table` (spec §4.7, §9 Open Question): this crate always performs a
/// forward (low-to-high) copy, including when `size` was given negative.
fn do_copy_table(machine: &mut Machine, ops: &[u16]) -> VmResult<()> {
    let src = ops[0] as u32;
    let dst = ops[1] as u32;
    let size = to_i16(ops[2]);
    if size == 0 {
        return Ok(());
    }
    let len = size.unsigned_abs() as usize;
    if dst == 0 {
        for i in 0..len as u32 {
            machine.memory.set_byte(src + i, 0)?;
        }
        return Ok(());
    }
    machine.memory.copy_block(src, dst, len)
}

/// `print_table(table, width, height=1, skip=0)`: print `height` rows of
/// `width` ZSCII bytes from `table`, each row separated by a newline and
/// `skip` bytes of padding between rows.
fn do_print_table(machine: &Machine, ops: &[u16], screen: &mut dyn Screen) -> VmResult<()> {
    let table = ops[0] as u32;
    let width = ops[1] as u32;
    let height = *ops.get(2).unwrap_or(&1) as u32;
    let skip = *ops.get(3).unwrap_or(&0) as u32;
    for row in 0..height {
        if row > 0 {
            screen.print("\n")?;
        }
        let row_addr = table + row * (width + skip);
        for i in 0..width {
            let code = machine.memory.get_byte(row_addr + i)? as u16;
            screen.print_char(machine.memory.zscii_to_unicode(code))?;
        }
    }
    Ok(())
}

fn do_tokenise(machine: &mut Machine, ops: &[u16]) -> VmResult<()> {
    let text_addr = ops[0] as u32;
    let parse_addr = ops[1] as u32;
    let dict_addr = *ops.get(2).unwrap_or(&0) as u32;
    let skip_unrecognized = *ops.get(3).unwrap_or(&0) != 0;

    let line = dictionary::read_text_buffer(&machine.memory, text_addr)?.to_ascii_lowercase();
    let header = if dict_addr != 0 {
        dictionary::parse_header_at(&machine.memory, dict_addr)?
    } else {
        dictionary::parse_header(&machine.memory)?
    };
    let tokens = dictionary::tokenize(&line, &header.separators);
    dictionary::write_parse_buffer(&mut machine.memory, parse_addr, &tokens, &header, skip_unrecognized)
}

/// `sread`/`aread` (spec §4.9): records what's needed and transitions to
/// `Suspended`. V1-3 interpreters must refresh the status line first.
fn start_sread(machine: &mut Machine, inst: &Instruction, ops: &[u16]) -> VmResult<StepOutcome> {
    let text_buffer = ops[0] as u32;
    let parse_buffer = *ops.get(1).unwrap_or(&0) as u32;
    let timeout_tenths = *ops.get(2).unwrap_or(&0);
    let timeout_routine = *ops.get(3).unwrap_or(&0);

    let (max_len, preloaded) = if machine.memory.header.version <= 4 {
        (machine.memory.get_byte(text_buffer)? as usize, String::new())
    } else {
        let max = machine.memory.get_byte(text_buffer)? as usize;
        let cur_len = machine.memory.get_byte(text_buffer + 1)? as usize;
        let bytes = machine.memory.get_bytes(text_buffer + 2, cur_len)?;
        (max, bytes.iter().map(|&b| b as char).collect())
    };

    machine.state = MachineState::Suspended(PendingInput::Line {
        text_buffer_addr: text_buffer,
        parse_buffer_addr: parse_buffer,
        max_len,
        preloaded,
        timeout_tenths,
        timeout_routine,
        result_var: inst.store_var,
    });
    Ok(StepOutcome::Suspended)
}

fn start_read_char(machine: &mut Machine, inst: &Instruction, ops: &[u16]) -> VmResult<StepOutcome> {
    let timeout_tenths = *ops.get(1).unwrap_or(&0);
    let timeout_routine = *ops.get(2).unwrap_or(&0);
    machine.state = MachineState::Suspended(PendingInput::Char {
        timeout_tenths,
        timeout_routine,
        result_var: inst.store_var,
    });
    Ok(StepOutcome::Suspended)
}

/// Complete a suspended `sread`/`aread`/`read_char` with the host-supplied
/// answer (spec §4.9). Must only be called while `machine.state` is
/// `Suspended`.
pub fn resume(machine: &mut Machine, event: InputEvent) -> VmResult<()> {
    let MachineState::Suspended(pending) = std::mem::replace(&mut machine.state, MachineState::Running) else {
        return Err(VmError::DecodeError {
            pc: machine.cpu.pc,
            reason: "resume() called while not suspended".to_string(),
        });
    };

    match (pending, event) {
        (
            PendingInput::Line {
                text_buffer_addr,
                parse_buffer_addr,
                max_len,
                result_var,
                ..
            },
            InputEvent::Line(line),
        ) => {
            let truncated: String = line.chars().take(max_len.saturating_sub(1).max(1)).collect();
            write_text_buffer(machine, text_buffer_addr, &truncated)?;
            if parse_buffer_addr != 0 {
                let header = dictionary::parse_header(&machine.memory)?;
                let tokens = dictionary::tokenize(&truncated.to_ascii_lowercase(), &header.separators);
                dictionary::write_parse_buffer(&mut machine.memory, parse_buffer_addr, &tokens, &header, false)?;
            }
            if machine.memory.header.version >= 5 {
                if let Some(var) = result_var {
                    machine.cpu.write_variable(&mut machine.memory, var, 13)?;
                }
            }
            Ok(())
        }
        (
            PendingInput::Line {
                text_buffer_addr,
                parse_buffer_addr,
                result_var,
                ..
            },
            InputEvent::TimedOut,
        ) => {
            write_text_buffer(machine, text_buffer_addr, "")?;
            if parse_buffer_addr != 0 {
                let header = dictionary::parse_header(&machine.memory)?;
                dictionary::write_parse_buffer(&mut machine.memory, parse_buffer_addr, &[], &header, false)?;
            }
            if let Some(var) = result_var {
                machine.cpu.write_variable(&mut machine.memory, var, 0)?;
            }
            Ok(())
        }
        (PendingInput::Char { result_var, .. }, InputEvent::Char(ch)) => {
            if let Some(var) = result_var {
                machine.cpu.write_variable(&mut machine.memory, var, ch as u16)?;
            }
            Ok(())
        }
        (PendingInput::Char { result_var, .. }, InputEvent::TimedOut) => {
            if let Some(var) = result_var {
                machine.cpu.write_variable(&mut machine.memory, var, 0)?;
            }
            Ok(())
        }
        (PendingInput::Line { .. }, InputEvent::Char(_)) => Err(VmError::DecodeError {
            pc: machine.cpu.pc,
            reason: "resumed a line request with a key event".to_string(),
        }),
        (PendingInput::Char { .. }, InputEvent::Line(_)) => Err(VmError::DecodeError {
            pc: machine.cpu.pc,
            reason: "resumed a key request with a line event".to_string(),
        }),
    }
}

fn write_text_buffer(machine: &mut Machine, text_buffer_addr: u32, text: &str) -> VmResult<()> {
    let lower: String = text.chars().map(|c| c.to_ascii_lowercase()).collect();
    if machine.memory.header.version <= 4 {
        for (i, b) in lower.bytes().enumerate() {
            machine.memory.set_byte(text_buffer_addr + 1 + i as u32, b)?;
        }
        machine
            .memory
            .set_byte(text_buffer_addr + 1 + lower.len() as u32, 0)?;
    } else {
        machine.memory.set_byte(text_buffer_addr + 1, lower.len() as u8)?;
        for (i, b) in lower.bytes().enumerate() {
            machine.memory.set_byte(text_buffer_addr + 2 + i as u32, b)?;
        }
    }
    Ok(())
}

/// Convert an `InputRequest` out of the currently-suspended state, for a
/// front end that wants to know what it's being asked for before answering.
pub fn pending_request(machine: &Machine) -> Option<InputRequest> {
    match &machine.state {
        MachineState::Suspended(PendingInput::Line {
            max_len,
            preloaded,
            timeout_tenths,
            timeout_routine,
            ..
        }) => Some(InputRequest::Line {
            max_len: *max_len,
            preloaded: preloaded.clone(),
            timeout_tenths: *timeout_tenths,
            timeout_routine: *timeout_routine,
        }),
        MachineState::Suspended(PendingInput::Char {
            timeout_tenths,
            timeout_routine,
            ..
        }) => Some(InputRequest::Char {
            timeout_tenths: *timeout_tenths,
            timeout_routine: *timeout_routine,
        }),
        _ => None,
    }
}
