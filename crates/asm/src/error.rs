use g10_errors::error;
use g10_object::g10::Address;

error! {
    #[doc = "Errors raised while assembling one translation unit."]
    #[doc = "\n"]
    #[doc = "An error aborts the unit: no partial object file is produced."]
    pub enum Error {
        #[code = E003]
        #[message = "The mnemonic is not part of the G10 instruction set."]
        #[formatted_message("I don't know the `{0}` mnemonic.")]
        #[help = "Check the mnemonic against the CPU manual; a typo such as `jbp` for `jpb` is the usual cause."]
        UnknownMnemonic(String),

        #[code = E004]
        #[message = "The instruction received operands of the wrong shape."]
        #[formatted_message("`{0}` does not accept this combination of operands.")]
        #[help = "Every mnemonic accepts a fixed set of operand shapes; check their order and addressing modes against the CPU manual."]
        OperandShape(String),

        #[code = E005]
        #[message = "An ALU instruction requires the accumulator as its first operand."]
        #[formatted_message("`{0}` requires `{1}` as its first operand.")]
        #[help = "8-bit ALU forms operate on `l0`, 16-bit forms on `w0`, and 32-bit forms on `d0`. Move the value into the accumulator first."]
        AccumulatorViolation(String, String),

        #[code = E006]
        #[message = "A value does not fit the field it is encoded into."]
        #[formatted_message("The value `{1}` does not fit {0}.")]
        #[help = "Either narrow the value, or use a wider form of the instruction."]
        ValueOutOfRange(String, i64),

        #[code = E007]
        #[message = "A branch target is out of range for the short branch instruction."]
        #[formatted_message("The branch target is {0} bytes away, outside the signed 16-bit range.")]
        #[help = "`jpb` reaches −0x8000..=0x7fff bytes around the byte following it; use the absolute `jmp` for anything further."]
        BranchOutOfRange(i64),

        #[code = E008]
        #[message = "A constant expression divides by zero."]
        #[help = "The divisor of a `/` or `%` folded to zero at assembly time."]
        DivisionByZero,

        #[code = E009]
        #[message = "A symbol is defined more than once."]
        #[formatted_message("The symbol `{0}` is already defined.")]
        #[help = "Local labels may be redefined, but a `global`, `weak` or `extern` name must keep a single definition."]
        Redefinition(String),

        #[code = E010]
        #[message = "A symbol's binding directives contradict each other."]
        #[formatted_message("The symbol `{0}` cannot be both `{1}` and `{2}`.")]
        #[help = "`global`/`weak` mean “defined here”; `extern` means “defined elsewhere”. Keep the directive matching where the definition lives."]
        BindingConflict(String, String, String),

        #[code = E011]
        #[message = "An expression refers to a symbol with no usable value."]
        #[formatted_message("The symbol `{0}` is not defined here, and the reference cannot be turned into a relocation.")]
        #[help = "Only `symbol` or `symbol ± constant` references can be deferred to link time; anything else must be computable at assembly time."]
        UndefinedSymbol(String),

        #[code = E009]
        #[message = "More than one symbol is marked as the entry point."]
        #[formatted_message("Cannot mark `{0}` as the entry point, `{1}` already is.")]
        #[help = "A translation unit carries at most one `entry` directive."]
        DuplicateEntry(String, String),

        #[code = E012]
        #[message = "A statement is placed in an address region that does not permit it."]
        #[formatted_message("{0} at {1} is not permitted: {2}.")]
        #[help = "Initialised bytes live below 0x80000000; reservations live at or above it. Check the `.org` directives."]
        RegionViolation(String, Address, String),

        #[code = E013]
        #[message = "Two sections of the translation unit overlap."]
        #[formatted_message("The sections based at {0} and {1} overlap.")]
        #[help = "Every emitted byte owns its absolute address; check the `.org` directives and the sizes of the sections they open."]
        SectionOverlap(Address, Address),

        #[message = "A statement appears before any origin directive."]
        #[help = "Open a section first with `.org <address>`."]
        StatementOutsideSection,

        #[code = E014]
        #[message = "The assembled object failed its own validation."]
        #[formatted_message("The assembled object failed its own validation: {0}.")]
        #[help = "This is a bug in the toolchain rather than in the source; please report it."]
        Validation(g10_object::g10::ValidationError),
    }
}
