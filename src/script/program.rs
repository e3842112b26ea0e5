//! Evaluation state for one script run

use super::{opcodes, parse, Operation};
use crate::constants::{MAX_MULTISIG_PUBLIC_KEYS, MAX_SCRIPT_OPS, MAX_SCRIPT_SIZE, MAX_STACK_SIZE};
use crate::error::ScriptError;
use crate::forks::Forks;
use crate::types::{ByteString, Transaction};
use std::sync::Arc;

/// Signature hashing rules in effect for a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigVersion {
    Base,
    WitnessV0,
}

/// The input being verified, shared by every phase of its evaluation.
#[derive(Debug, Clone, Copy)]
pub struct InputContext<'a> {
    pub transaction: &'a Transaction,
    pub index: usize,
    /// Value of the spent output.
    pub value: i64,
    pub forks: Forks,
}

impl<'a> InputContext<'a> {
    pub fn is_enabled(&self, fork: Forks) -> bool {
        self.forks.contains(fork)
    }
}

/// Stacks and counters for one script evaluation.
#[derive(Debug)]
pub struct Program<'a> {
    script: &'a [u8],
    operations: Arc<[Operation]>,
    input: InputContext<'a>,
    version: SigVersion,
    primary: Vec<ByteString>,
    alternate: Vec<ByteString>,
    conditions: Vec<bool>,
    negative_conditions: usize,
    operation_count: usize,
    jump: usize,
}

impl<'a> Program<'a> {
    /// An unparsable or oversized script never becomes a program.
    pub fn new(
        script: &'a [u8],
        input: InputContext<'a>,
        version: SigVersion,
        stack: Vec<ByteString>,
    ) -> Result<Self, ScriptError> {
        if script.len() > MAX_SCRIPT_SIZE {
            return Err(ScriptError::ScriptSize);
        }
        let operations = parse(script)?.into();

        Ok(Self {
            script,
            operations,
            input,
            version,
            primary: stack,
            alternate: Vec::new(),
            conditions: Vec::new(),
            negative_conditions: 0,
            operation_count: 0,
            jump: 0,
        })
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Operations detached from the program borrow, for the interpreter loop.
    pub(crate) fn shared_operations(&self) -> Arc<[Operation]> {
        Arc::clone(&self.operations)
    }

    pub fn input(&self) -> &InputContext<'a> {
        &self.input
    }

    pub fn version(&self) -> SigVersion {
        self.version
    }

    pub fn is_enabled(&self, fork: Forks) -> bool {
        self.input.is_enabled(fork)
    }

    /// Hand the primary stack to the next phase.
    pub fn into_stack(self) -> Vec<ByteString> {
        self.primary
    }

    // Counters.
    // ------------------------------------------------------------------------

    /// Count `code` toward the operation limit.
    pub fn increment_operation_count(&mut self, code: u8) -> Result<(), ScriptError> {
        if opcodes::is_counted(code) {
            self.operation_count += 1;
            if self.operation_count > MAX_SCRIPT_OPS {
                return Err(ScriptError::OpCount);
            }
        }
        Ok(())
    }

    /// Multisig keys count toward the operation limit.
    pub fn increment_multisig_public_key_count(&mut self, count: i64) -> Result<(), ScriptError> {
        if count < 0 || count > MAX_MULTISIG_PUBLIC_KEYS as i64 {
            return Err(ScriptError::PubkeyCount);
        }
        self.operation_count += count as usize;
        if self.operation_count > MAX_SCRIPT_OPS {
            return Err(ScriptError::OpCount);
        }
        Ok(())
    }

    pub fn operation_count(&self) -> usize {
        self.operation_count
    }

    // Primary stack.
    // ------------------------------------------------------------------------

    pub fn push(&mut self, value: ByteString) {
        self.primary.push(value);
    }

    pub fn pop(&mut self) -> Result<ByteString, ScriptError> {
        self.primary.pop().ok_or(ScriptError::InvalidStackOperation)
    }

    /// Element `index` from the top (0 is the top).
    pub fn item(&self, index: usize) -> Result<&ByteString, ScriptError> {
        self.position(index).map(|position| &self.primary[position])
    }

    /// Push a copy of element `index` from the top.
    pub fn duplicate(&mut self, index: usize) -> Result<(), ScriptError> {
        let copy = self.item(index)?.clone();
        self.primary.push(copy);
        Ok(())
    }

    /// Swap elements `first` and `second` counted from the top.
    pub fn swap(&mut self, first: usize, second: usize) -> Result<(), ScriptError> {
        let first = self.position(first)?;
        let second = self.position(second)?;
        self.primary.swap(first, second);
        Ok(())
    }

    /// Remove and return element `index` from the top.
    pub fn erase(&mut self, index: usize) -> Result<ByteString, ScriptError> {
        let position = self.position(index)?;
        Ok(self.primary.remove(position))
    }

    /// Remove elements `first..last` counted from the top (`first` nearer the top).
    pub fn erase_range(&mut self, first: usize, last: usize) -> Result<(), ScriptError> {
        if first > last || last > self.primary.len() {
            return Err(ScriptError::InvalidStackOperation);
        }
        let length = self.primary.len();
        self.primary.drain(length - last..length - first);
        Ok(())
    }

    pub fn stack_size(&self) -> usize {
        self.primary.len()
    }

    pub fn is_stack_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// At least `depth` elements on the primary stack.
    pub fn require(&self, depth: usize) -> Result<(), ScriptError> {
        if self.primary.len() < depth {
            return Err(ScriptError::InvalidStackOperation);
        }
        Ok(())
    }

    fn position(&self, index: usize) -> Result<usize, ScriptError> {
        self.primary
            .len()
            .checked_sub(index + 1)
            .ok_or(ScriptError::InvalidStackOperation)
    }

    /// Combined stack size within the limit.
    pub fn check_stack_size(&self) -> Result<(), ScriptError> {
        if self.primary.len() + self.alternate.len() > MAX_STACK_SIZE {
            return Err(ScriptError::StackSize);
        }
        Ok(())
    }

    // Alternate stack.
    // ------------------------------------------------------------------------

    pub fn push_alternate(&mut self, value: ByteString) {
        self.alternate.push(value);
    }

    pub fn pop_alternate(&mut self) -> Result<ByteString, ScriptError> {
        self.alternate
            .pop()
            .ok_or(ScriptError::InvalidAltstackOperation)
    }

    // Conditions.
    // ------------------------------------------------------------------------

    /// Every enclosing branch is taken.
    pub fn is_executing(&self) -> bool {
        self.negative_conditions == 0
    }

    pub fn open_condition(&mut self, value: bool) {
        if !value {
            self.negative_conditions += 1;
        }
        self.conditions.push(value);
    }

    pub fn negate_condition(&mut self) -> Result<(), ScriptError> {
        let top = self
            .conditions
            .last_mut()
            .ok_or(ScriptError::UnbalancedConditional)?;
        if *top {
            self.negative_conditions += 1;
        } else {
            self.negative_conditions -= 1;
        }
        *top = !*top;
        Ok(())
    }

    pub fn close_condition(&mut self) -> Result<(), ScriptError> {
        let top = self
            .conditions
            .pop()
            .ok_or(ScriptError::UnbalancedConditional)?;
        if !top {
            self.negative_conditions -= 1;
        }
        Ok(())
    }

    pub fn is_balanced(&self) -> bool {
        self.conditions.is_empty()
    }

    // Signature hashing.
    // ------------------------------------------------------------------------

    /// Record an executed CODESEPARATOR ending at byte offset `end`.
    pub fn set_jump(&mut self, end: usize) {
        self.jump = end;
    }

    /// Script bytes from the last executed CODESEPARATOR to the end.
    pub fn subscript(&self) -> &'a [u8] {
        &self.script[self.jump..]
    }

    /// Non-empty stack with a true top element.
    pub fn stack_result(&self) -> bool {
        self.primary
            .last()
            .map(|top| super::number::is_true(top))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::opcodes::*;

    fn transaction() -> Transaction {
        Transaction {
            version: 1,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
        }
    }

    fn program<'a>(script: &'a [u8], tx: &'a Transaction, stack: Vec<ByteString>) -> Program<'a> {
        let input = InputContext {
            transaction: tx,
            index: 0,
            value: 0,
            forks: Forks::NONE,
        };
        Program::new(script, input, SigVersion::Base, stack).unwrap()
    }

    #[test]
    fn test_invalid_scripts_never_construct() {
        let tx = transaction();
        let input = InputContext {
            transaction: &tx,
            index: 0,
            value: 0,
            forks: Forks::NONE,
        };
        let oversized = vec![OP_NOP; MAX_SCRIPT_SIZE + 1];
        assert_eq!(
            Program::new(&oversized, input, SigVersion::Base, Vec::new()).unwrap_err(),
            ScriptError::ScriptSize
        );
        assert_eq!(
            Program::new(&[0x4c], input, SigVersion::Base, Vec::new()).unwrap_err(),
            ScriptError::InvalidScript
        );
    }

    #[test]
    fn test_stack_primitives() {
        let tx = transaction();
        let mut program = program(&[], &tx, vec![vec![1], vec![2], vec![3]]);

        program.duplicate(2).unwrap();
        assert_eq!(program.item(0).unwrap(), &vec![1]);
        program.swap(0, 1).unwrap();
        assert_eq!(program.item(0).unwrap(), &vec![3]);
        assert_eq!(program.erase(1).unwrap(), vec![1]);
        assert_eq!(program.stack_size(), 3);

        program.erase_range(0, 2).unwrap();
        assert_eq!(program.stack_size(), 1);
        assert_eq!(program.item(0).unwrap(), &vec![1]);
    }

    #[test]
    fn test_pop_empty_is_an_error() {
        let tx = transaction();
        let mut program = program(&[], &tx, Vec::new());
        assert_eq!(program.pop(), Err(ScriptError::InvalidStackOperation));
        assert_eq!(program.duplicate(0), Err(ScriptError::InvalidStackOperation));
        assert_eq!(program.swap(0, 1), Err(ScriptError::InvalidStackOperation));
        assert_eq!(program.pop_alternate(), Err(ScriptError::InvalidAltstackOperation));
    }

    #[test]
    fn test_operation_count_limit() {
        let tx = transaction();
        let mut program = program(&[], &tx, Vec::new());
        for _ in 0..MAX_SCRIPT_OPS {
            program.increment_operation_count(OP_NOP).unwrap();
        }
        // Pushes are free.
        program.increment_operation_count(OP_1).unwrap();
        assert_eq!(program.increment_operation_count(OP_NOP), Err(ScriptError::OpCount));
    }

    #[test]
    fn test_multisig_key_count_limits() {
        let tx = transaction();
        let mut program = program(&[], &tx, Vec::new());
        assert_eq!(program.increment_multisig_public_key_count(-1), Err(ScriptError::PubkeyCount));
        assert_eq!(program.increment_multisig_public_key_count(21), Err(ScriptError::PubkeyCount));
        for _ in 0..10 {
            program.increment_multisig_public_key_count(20).unwrap();
        }
        assert_eq!(program.operation_count(), 200);
        assert_eq!(program.increment_multisig_public_key_count(2), Err(ScriptError::OpCount));
    }

    #[test]
    fn test_conditions() {
        let tx = transaction();
        let mut program = program(&[], &tx, Vec::new());
        program.open_condition(true);
        program.open_condition(false);
        assert!(!program.is_executing());
        program.negate_condition().unwrap();
        assert!(program.is_executing());
        program.close_condition().unwrap();
        program.close_condition().unwrap();
        assert!(program.is_balanced());
        assert_eq!(program.close_condition(), Err(ScriptError::UnbalancedConditional));
    }

    #[test]
    fn test_subscript_and_stack_result() {
        let tx = transaction();
        let script = [OP_1, OP_CODESEPARATOR, OP_DUP];
        let mut program = program(&script, &tx, vec![vec![0x80]]);
        assert_eq!(program.subscript(), &script[..]);
        program.set_jump(2);
        assert_eq!(program.subscript(), &[OP_DUP][..]);

        assert!(!program.stack_result());
        program.push(vec![0x00, 0x01]);
        assert!(program.stack_result());
    }
}
