//! The instruction vocabulary the compiler uses against the backend.
//!
//! These are *requests*, not an encoding: each variant names an operation the
//! emitted program performs on the operand stack, on its local frame, or
//! against the runtime library surface (node iterators, DOM accessors, the
//! output handler). How a backend encodes them is its own concern.

/// Index into a program's constant pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstIdx(pub u32);

/// Identifier of a generated method within a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub u32);

/// Numeric kind of an arithmetic or comparison instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumKind {
    Int,
    Real,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// The operator testing the opposite outcome.
    pub fn negate(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
        }
    }

    /// The operator equivalent under swapped operands.
    pub fn mirror(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Ne => CmpOp::Ne,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
        }
    }
}

/// Condition of a conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    /// Pop a boolean; branch when true.
    True,
    /// Pop a boolean; branch when false.
    False,
    /// Pop two numeric values; branch when `left op right` holds.
    Cmp(CmpOp, NumKind),
    /// Pop a value; branch when it is the null/absent value.
    IsNull,
    /// Pop a value; branch when it is not the null/absent value.
    NotNull,
}

/// Axis vocabulary of the runtime's node-iterator constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisKind {
    Child,
    Descendant,
    DescendantOrSelf,
    Attribute,
    Parent,
    Ancestor,
    AncestorOrSelf,
    SelfAxis,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
}

impl AxisKind {
    /// Whether the axis yields nodes in reverse document order.
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            AxisKind::Parent
                | AxisKind::Ancestor
                | AxisKind::AncestorOrSelf
                | AxisKind::PrecedingSibling
                | AxisKind::Preceding
        )
    }
}

/// Structural node kinds the runtime DOM distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Root,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
}

impl NodeKind {
    /// The integer code `GetNodeType` pushes for this kind.
    pub fn code(self) -> i64 {
        match self {
            NodeKind::Root => 0,
            NodeKind::Element => 1,
            NodeKind::Attribute => 2,
            NodeKind::Text => 3,
            NodeKind::Comment => 4,
            NodeKind::ProcessingInstruction => 5,
        }
    }
}

/// The runtime library surface invoked by generated code.
///
/// Stack effects are noted as `pops -> pushes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFn {
    // --- Node-set iterators ---
    /// `() -> iterator` over all nodes of an axis (unstarted).
    AxisIterator(AxisKind),
    /// `(name: str) -> iterator` filtered to a node name (unstarted).
    NamedAxisIterator(AxisKind),
    /// `() -> iterator` filtered to a node kind (unstarted).
    TypedAxisIterator(AxisKind, NodeKind),
    /// `(node) -> iterator` yielding exactly that node.
    SingletonIterator,
    /// `(iterator, node) -> iterator` positioned at a start node.
    SetStartNode,
    /// `(outer: iterator, inner: iterator) -> iterator` applying the inner
    /// step to every node the outer yields.
    StepIterator,
    /// `(left: iterator, right: iterator) -> iterator` of the set union.
    UnionIterator,
    /// `(iterator) -> iterator` restored to document order, duplicates
    /// removed.
    OrderNormalize,
    /// `(iterator) -> iterator` (independent cursor).
    CloneIterator,
    /// `(iterator) -> node|null`, advancing the cursor.
    IteratorNext,
    /// `(iterator) -> int` (context position of the last node returned).
    IteratorPosition,
    /// `(iterator) -> int` (context size).
    IteratorLast,
    /// `(iterator, value: int) -> iterator` keeping the node at that
    /// position only.
    PositionFilter,
    /// `(iterator, captures..., method) -> iterator` keeping nodes for which
    /// the predicate method returns true. The method receives
    /// `(node, position, last, captures...)`.
    FilterIterator(u8),
    /// `(iterator, (key-method, order: str, data-type: str)...) -> iterator`
    /// sorted by the given keys, most significant first.
    SortIterator(u8),
    /// `(node, method) -> bool`: evaluate a pattern-predicate method against
    /// a node with its sibling-derived position and size.
    CallPredicate,

    // --- DOM accessors ---
    /// `(node) -> node|null`.
    GetParent,
    /// `(node) -> node` (owning document root).
    GetRoot,
    /// `(node) -> int` (a `NodeKind` code).
    GetNodeType,
    /// `(node) -> str` (expanded node name).
    GetNodeName,
    /// `(node) -> str` (XPath string value).
    StringValueOf,
    /// `(node) -> ()`: copy the node shallowly to the output handler.
    ShallowCopy,
    /// `(node) -> ()`: copy the whole subtree to the output handler.
    DeepCopy,
    /// `(tree: result-tree) -> ()`: replay a result-tree fragment into the
    /// output handler.
    CopyResultTree,

    // --- Output handler ---
    /// `(name: str) -> ()`.
    StartElement,
    /// `(name: str) -> ()`.
    EndElement,
    /// `(name: str, value: str) -> ()`.
    AddAttribute,
    /// `(text: str) -> ()`.
    Characters,
    /// `(text: str) -> ()`.
    Comment,
    /// `(target: str, data: str) -> ()`.
    ProcessingInstruction,
    /// `() -> ()`: substitute a string-capturing output handler.
    StartCapture,
    /// `() -> str`: pop the capturing handler, pushing what it saw.
    EndCapture,
    /// `(text: str) -> ()`: report a message; `true` also terminates.
    Message(bool),

    // --- Conversions (the cast code shapes) ---
    IntToReal,
    RealToInt,
    IntToString,
    RealToString,
    BooleanToString,
    /// Nonzero test.
    IntToBoolean,
    /// Nonzero-and-not-NaN test.
    RealToBoolean,
    /// Non-empty test.
    StringToBoolean,
    /// XPath `number()` semantics; NaN on malformed input.
    StringToReal,
    /// Non-empty test.
    NodeSetToBoolean,
    /// String value of the first node in document order; empty when the set
    /// is empty.
    NodeSetToString,
    /// Via `NodeSetToString` then `StringToReal`.
    NodeSetToReal,
    /// First node in document order; null when empty.
    NodeSetToNode,
    NodeToString,
    NodeToReal,
    ResultTreeToString,
    ResultTreeToReal,
    // Wrap a value into a runtime reference.
    BoxInt,
    BoxReal,
    BoxBoolean,
    BoxString,
    BoxNodeSet,
    BoxNode,
    BoxResultTree,
    /// Runtime-checked unwrap of a reference.
    UnboxInt,
    UnboxReal,
    UnboxBoolean,
    UnboxString,
    UnboxNodeSet,

    // --- Strings and core functions ---
    /// `(left: str, right: str) -> bool`.
    StringEq,
    /// `(parts: str * n) -> str`.
    ConcatStrings(u8),
    StringLength,
    Contains,
    StartsWith,
    /// `(s, from) -> str` / `(s, from, len) -> str`.
    Substring(u8),
    SubstringBefore,
    SubstringAfter,
    NormalizeSpace,
    Translate,
    /// `(iterator) -> int`.
    CountNodes,
    /// `(iterator) -> real`.
    SumNodes,
    Floor,
    Ceiling,
    Round,
    /// `(lang: str) -> bool` against the context node's `xml:lang`.
    Lang,
    /// `(node) -> str`.
    GenerateId,
    /// `(node-set cmp str/real/node-set) -> bool`, existential semantics.
    NodeSetCmpString(CmpOp),
    NodeSetCmpReal(CmpOp),
    NodeSetCmpNodeSet(CmpOp),
    /// `(left: ref, right: ref) -> bool`, type-dispatched at runtime.
    ReferenceCmp(CmpOp),

    // --- Indexes and parameters ---
    /// `(name: str, value: str) -> iterator`.
    KeyLookup,
    /// `(value: str) -> iterator`.
    IdLookup,
    /// `() -> ()`: open a parameter frame for an outgoing call.
    PushParamFrame,
    /// `() -> ()`.
    PopParamFrame,
    /// `(name: str, value: ref) -> ()` into the current outgoing frame.
    SetParam,
    /// `(name: str) -> ref|null` from the caller's frame.
    LookupParam,

    // --- Failure ---
    /// `(message: str) -> !`: raise a runtime error if ever executed.
    RaiseError,
}

/// One abstract instruction of a method body.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    PushInt(i64),
    PushReal(f64),
    PushStr(ConstIdx),
    PushBool(bool),
    PushNull,
    /// Push a method handle (for filter/sort-key/predicate arguments).
    PushMethod(MethodId),
    Pop,
    Dup,
    LoadLocal(super::Slot),
    StoreLocal(super::Slot),
    LoadGlobal(u16),
    StoreGlobal(u16),
    Arith(ArithOp, NumKind),
    Neg(NumKind),
    /// Conditional branch; `target` is `None` until backpatched.
    Branch { cond: Cond, target: Option<super::Label> },
    /// Unconditional jump; `target` is `None` until backpatched.
    Jump { target: Option<super::Label> },
    CallRuntime(RuntimeFn),
    /// Invoke a generated method. Argument/return discipline is recorded in
    /// the method's [`MethodSig`](crate::MethodSig).
    CallMethod(MethodId),
    Return,
}
