//! End-to-end scenario tests exercising the executor against hand-assembled
//! instruction bytes, plus the dictionary and object-tree modules directly
//! for scenarios that don't need a running machine.

mod common;

use common::{bare_story, MapStorage, RecordingScreen};

use zmvm::config::{Config, WritePolicy};
use zmvm::dictionary::{self, DictionaryHeader};
use zmvm::executor;
use zmvm::header::ScreenCaps;
use zmvm::machine::Machine;
use zmvm::memory::Memory;
use zmvm::object;

/// `add(0x7FFF, 1)` stored to a global must wrap to `0x8000`, not panic or
/// saturate.
#[test]
fn arithmetic_wraparound() {
    let mut bytes = bare_story(3, 0x200, 0x100, 0x180, 0x60);
    bytes[0x60] = 0xD4; // variable form, 2OP opcode 0x14 (add)
    bytes[0x61] = 0x0F; // large, large, omitted, omitted
    bytes[0x62..0x64].copy_from_slice(&0x7FFFu16.to_be_bytes());
    bytes[0x64..0x66].copy_from_slice(&0x0001u16.to_be_bytes());
    bytes[0x66] = 0x10; // store to global 16 (first global slot)

    let mut machine = Machine::new(bytes, Config::default(), ScreenCaps::default()).unwrap();
    let mut screen = RecordingScreen::default();
    let mut storage = MapStorage::default();

    executor::step(&mut machine, &mut screen, &mut storage).unwrap();

    assert_eq!(machine.memory.get_word(0x100).unwrap(), 0x8000);
}

/// `je 7, 1, 3, 7` (four operands) with branch-on-true offset 10 must take
/// the branch, since 7 matches the first operand.
#[test]
fn je_with_four_operands() {
    let mut bytes = bare_story(3, 0x200, 0x100, 0x180, 0x70);
    bytes[0x70] = 0xC1; // variable form, 2OP opcode 0x01 (je)
    bytes[0x71] = 0x55; // four small-constant operands
    bytes[0x72] = 7;
    bytes[0x73] = 1;
    bytes[0x74] = 3;
    bytes[0x75] = 7;
    bytes[0x76] = 0xCA; // branch on true, one-byte offset 10

    let mut machine = Machine::new(bytes, Config::default(), ScreenCaps::default()).unwrap();
    let mut screen = RecordingScreen::default();
    let mut storage = MapStorage::default();
    let pc_before = machine.cpu.pc;

    executor::step(&mut machine, &mut screen, &mut storage).unwrap();

    // branch target = address after the branch byte (inst size) + offset - 2
    assert_eq!(machine.cpu.pc, pc_before + 7 + 10 - 2);
}

/// `call_2s PACK(R), 9` where R is `add L1, 1; ret_popped` (L1 initially 0,
/// overwritten by the call argument) must leave the destination variable
/// holding 10 and the evaluation stack empty.
#[test]
fn call_discipline() {
    let mut bytes = bare_story(3, 0x200, 0x100, 0x180, 0x60);

    // Routine R at 0x50: one local, body `add L1, 1 -> stack; ret_popped`.
    bytes[0x50] = 1; // one local
    bytes[0x51..0x53].copy_from_slice(&0u16.to_be_bytes()); // initial value, overridden by arg
    bytes[0x53] = 0x54; // long form add, operand1 variable, operand2 small constant
    bytes[0x54] = 0x01; // operand1 = variable 1 (L1)
    bytes[0x55] = 0x01; // operand2 = 1
    bytes[0x56] = 0x00; // store to stack
    bytes[0x57] = 0xB8; // ret_popped (short form, 0OP)

    // call_2s PACK(R), 9 -> global 16
    bytes[0x60] = 0xD9; // variable form, 2OP opcode 0x19 (call_2s)
    bytes[0x61] = 0x1F; // large constant, small constant, omitted, omitted
    bytes[0x62..0x64].copy_from_slice(&0x0028u16.to_be_bytes()); // PACK(0x50) for v3
    bytes[0x64] = 9;
    bytes[0x65] = 0x10;

    let mut machine = Machine::new(bytes, Config::default(), ScreenCaps::default()).unwrap();
    let mut screen = RecordingScreen::default();
    let mut storage = MapStorage::default();

    executor::step(&mut machine, &mut screen, &mut storage).unwrap(); // call_2s
    executor::step(&mut machine, &mut screen, &mut storage).unwrap(); // add
    executor::step(&mut machine, &mut screen, &mut storage).unwrap(); // ret_popped

    assert_eq!(machine.memory.get_word(0x100).unwrap(), 10);
    assert!(machine.cpu.stack.is_empty());
}

/// Three objects with all relations zero: inserting 2 under 1, then 3 under
/// 1, builds the sibling chain in the order the Standard requires (newest
/// child becomes the parent's child, pushing the previous child to sibling).
#[test]
fn object_insert() {
    let mut bytes = vec![0u8; 512];
    bytes[0] = 3;
    bytes[0x0E..0x10].copy_from_slice(&400u16.to_be_bytes());
    let obj_table: u16 = 0x40;
    bytes[0x0A..0x0C].copy_from_slice(&obj_table.to_be_bytes());

    let defaults_base = obj_table as usize;
    let tree_base = defaults_base + 31 * 2;
    let prop_table = |n: usize| tree_base + 9 * 3 + 10 + n * 10;

    for (i, prop_table_addr) in [prop_table(0), prop_table(1), prop_table(2)].into_iter().enumerate() {
        let obj = tree_base + i * 9;
        bytes[obj + 7..obj + 9].copy_from_slice(&(prop_table_addr as u16).to_be_bytes());
        bytes[prop_table_addr] = 0;
        bytes[prop_table_addr + 1] = 0;
    }

    let mut mem = Memory::new(bytes, WritePolicy::Fatal).unwrap();

    object::insert_object(&mut mem, 2, 1).unwrap();
    assert_eq!(object::get_child(&mem, 1).unwrap(), 2);
    assert_eq!(object::get_parent(&mem, 2).unwrap(), 1);
    assert_eq!(object::get_sibling(&mem, 2).unwrap(), 0);

    object::insert_object(&mut mem, 3, 1).unwrap();
    assert_eq!(object::get_child(&mem, 1).unwrap(), 3);
    assert_eq!(object::get_sibling(&mem, 3).unwrap(), 2);
    assert_eq!(object::get_parent(&mem, 3).unwrap(), 1);
}

/// A dictionary with separator `.` and entries `look`/`north`: the line
/// `look.north` tokenizes into three tokens with the separator as its own
/// token, and each word resolves against the dictionary correctly.
#[test]
fn tokenizer() {
    let mut bytes = vec![0u8; 128];
    bytes[0] = 3;
    bytes[0x0E..0x10].copy_from_slice(&100u16.to_be_bytes());

    let entries_addr: u32 = 0x20;
    let look_key = dictionary::encode_key("look", 3);
    let north_key = dictionary::encode_key("north", 3);
    bytes[0x20..0x24].copy_from_slice(&look_key);
    bytes[0x24..0x28].copy_from_slice(&north_key);

    let mem = Memory::new(bytes, WritePolicy::Fatal).unwrap();
    let header = DictionaryHeader {
        separators: vec![b'.'],
        entry_length: 4,
        num_entries: -2, // unsorted: linear scan, order-independent
        entries_addr,
    };

    let tokens = dictionary::tokenize("look.north", &header.separators);
    assert_eq!(tokens.len(), 3);
    assert_eq!((tokens[0].text.as_str(), tokens[0].start, tokens[0].len), ("look", 0, 4));
    assert_eq!((tokens[1].text.as_str(), tokens[1].start, tokens[1].len), (".", 4, 1));
    assert_eq!((tokens[2].text.as_str(), tokens[2].start, tokens[2].len), ("north", 5, 5));

    assert_ne!(dictionary::lookup_in(&mem, "look", &header).unwrap(), 0);
    assert_ne!(dictionary::lookup_in(&mem, "north", &header).unwrap(), 0);
    assert_eq!(dictionary::lookup_in(&mem, ".", &header).unwrap(), 0);
}

/// `save_undo; store V, 5; restore_undo` must leave `V` at its pre-save
/// value and the undo ring empty (a restore pops the snapshot it uses).
#[test]
fn undo() {
    let mut bytes = bare_story(5, 0x200, 0x100, 0x180, 0x60);
    // save_undo -> discard result into global 0x11
    bytes[0x60] = 0xBE;
    bytes[0x61] = 0x09;
    bytes[0x62] = 0xFF;
    bytes[0x63] = 0x11;
    // store G(global 0x10), 5
    bytes[0x64] = 0x0D; // long form, both operands small constant, opcode 0x0D (store)
    bytes[0x65] = 0x10; // variable number to write: global 16
    bytes[0x66] = 5;
    // restore_undo -> discard result into global 0x12
    bytes[0x67] = 0xBE;
    bytes[0x68] = 0x0A;
    bytes[0x69] = 0xFF;
    bytes[0x6A] = 0x12;

    let mut machine = Machine::new(bytes, Config::default(), ScreenCaps::default()).unwrap();
    let mut screen = RecordingScreen::default();
    let mut storage = MapStorage::default();

    executor::step(&mut machine, &mut screen, &mut storage).unwrap(); // save_undo
    let pre_save_value = machine.memory.get_word(0x100).unwrap();
    executor::step(&mut machine, &mut screen, &mut storage).unwrap(); // store G, 5
    assert_eq!(machine.memory.get_word(0x100).unwrap(), 5);
    executor::step(&mut machine, &mut screen, &mut storage).unwrap(); // restore_undo

    assert_eq!(machine.memory.get_word(0x100).unwrap(), pre_save_value);
    assert!(machine.undo.is_empty());
}

/// `loadw` wraps the computed byte address modulo 0x10000: with `array =
/// 0xFFFE` and index 2, it reads address `(0xFFFE + 4) & 0xFFFF = 0x0002`.
#[test]
fn loadw_wrap() {
    let mut bytes = bare_story(3, 0x200, 0x100, 0x180, 0x60);
    bytes[0x02..0x04].copy_from_slice(&0xBEEFu16.to_be_bytes());

    bytes[0x60] = 0xCF; // variable form, 2OP opcode 0x0F (loadw)
    bytes[0x61] = 0x1F; // large constant, small constant, omitted, omitted
    bytes[0x62..0x64].copy_from_slice(&0xFFFEu16.to_be_bytes());
    bytes[0x64] = 2;
    bytes[0x65] = 0x10;

    let mut machine = Machine::new(bytes, Config::default(), ScreenCaps::default()).unwrap();
    let mut screen = RecordingScreen::default();
    let mut storage = MapStorage::default();

    executor::step(&mut machine, &mut screen, &mut storage).unwrap();

    assert_eq!(machine.memory.get_word(0x100).unwrap(), 0xBEEF);
}
