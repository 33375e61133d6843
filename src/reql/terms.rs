//! ReQL term types and their wire codes.
//!
//! The discriminants are the server's `Term.TermType` codes. They are stable
//! across protocol versions and are never renumbered, so a `TermType` can be
//! written straight into the first slot of a serialized term.
//!
//! # Term Categories
//!
//! - **Core Data**: DATUM, MAKE_ARRAY, MAKE_OBJ, VAR, IMPLICIT_VAR
//! - **Database Operations**: DB, DB_CREATE, DB_DROP, DB_LIST
//! - **Table Operations**: TABLE, TABLE_CREATE, TABLE_DROP, TABLE_LIST, indexes
//! - **Data Access**: GET, GET_ALL, BETWEEN
//! - **Transformations**: FILTER, MAP, CONCAT_MAP, ORDER_BY, DISTINCT
//! - **Aggregations**: COUNT, SUM, AVG, MIN, MAX, GROUP, REDUCE
//! - **Math & Logic**: ADD, SUB, MUL, DIV, MOD, EQ, NE, LT, LE, GT, GE, AND, OR, NOT
//! - **Control Flow**: BRANCH, FOR_EACH, FUNC, FUNCALL
//! - **Time**: NOW, TIME, EPOCH_TIME, ISO8601
//!
//! # Example
//!
//! ```rust,ignore
//! use reql_driver::reql::TermType;
//!
//! let term_type = TermType::from_u64(38).unwrap();
//! assert_eq!(term_type, TermType::Map);
//! assert_eq!(term_type.name(), "MAP");
//! ```

use serde::{Deserialize, Serialize};

macro_rules! term_types {
    ($($variant:ident = $code:literal => $name:literal,)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[repr(u64)]
        pub enum TermType {
            $($variant = $code,)*
        }

        impl TermType {
            /// Converts a wire code into a term type, `None` if the code is unknown.
            pub fn from_u64(value: u64) -> Option<Self> {
                match value {
                    $($code => Some(TermType::$variant),)*
                    _ => None,
                }
            }

            /// Upper-case wire name, e.g. `"GET_ALL"`.
            pub fn name(&self) -> &'static str {
                match self {
                    $(TermType::$variant => $name,)*
                }
            }
        }
    };
}

term_types! {
    Datum = 1 => "DATUM",
    MakeArray = 2 => "MAKE_ARRAY",
    MakeObj = 3 => "MAKE_OBJ",
    Var = 10 => "VAR",
    Javascript = 11 => "JAVASCRIPT",
    Error = 12 => "ERROR",
    ImplicitVar = 13 => "IMPLICIT_VAR",
    Db = 14 => "DB",
    Table = 15 => "TABLE",
    Get = 16 => "GET",
    Eq = 17 => "EQ",
    Ne = 18 => "NE",
    Lt = 19 => "LT",
    Le = 20 => "LE",
    Gt = 21 => "GT",
    Ge = 22 => "GE",
    Not = 23 => "NOT",
    Add = 24 => "ADD",
    Sub = 25 => "SUB",
    Mul = 26 => "MUL",
    Div = 27 => "DIV",
    Mod = 28 => "MOD",
    Append = 29 => "APPEND",
    Slice = 30 => "SLICE",
    GetField = 31 => "GET_FIELD",
    HasFields = 32 => "HAS_FIELDS",
    Pluck = 33 => "PLUCK",
    Without = 34 => "WITHOUT",
    Merge = 35 => "MERGE",
    Reduce = 37 => "REDUCE",
    Map = 38 => "MAP",
    Filter = 39 => "FILTER",
    ConcatMap = 40 => "CONCAT_MAP",
    OrderBy = 41 => "ORDER_BY",
    Distinct = 42 => "DISTINCT",
    Count = 43 => "COUNT",
    Union = 44 => "UNION",
    Nth = 45 => "NTH",
    InnerJoin = 48 => "INNER_JOIN",
    OuterJoin = 49 => "OUTER_JOIN",
    EqJoin = 50 => "EQ_JOIN",
    CoerceTo = 51 => "COERCE_TO",
    TypeOf = 52 => "TYPE_OF",
    Update = 53 => "UPDATE",
    Delete = 54 => "DELETE",
    Replace = 55 => "REPLACE",
    Insert = 56 => "INSERT",
    DbCreate = 57 => "DB_CREATE",
    DbDrop = 58 => "DB_DROP",
    DbList = 59 => "DB_LIST",
    TableCreate = 60 => "TABLE_CREATE",
    TableDrop = 61 => "TABLE_DROP",
    TableList = 62 => "TABLE_LIST",
    Funcall = 64 => "FUNCALL",
    Branch = 65 => "BRANCH",
    Or = 66 => "OR",
    And = 67 => "AND",
    ForEach = 68 => "FOR_EACH",
    Func = 69 => "FUNC",
    Skip = 70 => "SKIP",
    Limit = 71 => "LIMIT",
    Zip = 72 => "ZIP",
    Asc = 73 => "ASC",
    Desc = 74 => "DESC",
    IndexCreate = 75 => "INDEX_CREATE",
    IndexDrop = 76 => "INDEX_DROP",
    IndexList = 77 => "INDEX_LIST",
    GetAll = 78 => "GET_ALL",
    Info = 79 => "INFO",
    Prepend = 80 => "PREPEND",
    Sample = 81 => "SAMPLE",
    InsertAt = 82 => "INSERT_AT",
    DeleteAt = 83 => "DELETE_AT",
    ChangeAt = 84 => "CHANGE_AT",
    SpliceAt = 85 => "SPLICE_AT",
    IsEmpty = 86 => "IS_EMPTY",
    OffsetsOf = 87 => "OFFSETS_OF",
    SetInsert = 88 => "SET_INSERT",
    SetIntersection = 89 => "SET_INTERSECTION",
    SetUnion = 90 => "SET_UNION",
    SetDifference = 91 => "SET_DIFFERENCE",
    Default = 92 => "DEFAULT",
    Contains = 93 => "CONTAINS",
    Keys = 94 => "KEYS",
    Difference = 95 => "DIFFERENCE",
    WithFields = 96 => "WITH_FIELDS",
    Match = 97 => "MATCH",
    Json = 98 => "JSON",
    Iso8601 = 99 => "ISO8601",
    ToIso8601 = 100 => "TO_ISO8601",
    EpochTime = 101 => "EPOCH_TIME",
    ToEpochTime = 102 => "TO_EPOCH_TIME",
    Now = 103 => "NOW",
    InTimezone = 104 => "IN_TIMEZONE",
    During = 105 => "DURING",
    Date = 106 => "DATE",
    Time = 136 => "TIME",
    Literal = 137 => "LITERAL",
    Sync = 138 => "SYNC",
    IndexStatus = 139 => "INDEX_STATUS",
    IndexWait = 140 => "INDEX_WAIT",
    Upcase = 141 => "UPCASE",
    Downcase = 142 => "DOWNCASE",
    Object = 143 => "OBJECT",
    Group = 144 => "GROUP",
    Sum = 145 => "SUM",
    Avg = 146 => "AVG",
    Min = 147 => "MIN",
    Max = 148 => "MAX",
    Split = 149 => "SPLIT",
    Ungroup = 150 => "UNGROUP",
    Random = 151 => "RANDOM",
    Changes = 152 => "CHANGES",
    Http = 153 => "HTTP",
    Args = 154 => "ARGS",
    Binary = 155 => "BINARY",
    IndexRename = 156 => "INDEX_RENAME",
    Geojson = 157 => "GEOJSON",
    Uuid = 169 => "UUID",
    Bracket = 170 => "BRACKET",
    Range = 173 => "RANGE",
    Config = 174 => "CONFIG",
    Status = 175 => "STATUS",
    Reconfigure = 176 => "RECONFIGURE",
    Wait = 177 => "WAIT",
    Rebalance = 179 => "REBALANCE",
    Minval = 180 => "MINVAL",
    Maxval = 181 => "MAXVAL",
    Between = 182 => "BETWEEN",
    Floor = 183 => "FLOOR",
    Ceil = 184 => "CEIL",
    Round = 185 => "ROUND",
    Values = 186 => "VALUES",
    Fold = 187 => "FOLD",
    Grant = 188 => "GRANT",
}

impl TermType {
    /// Numeric wire code.
    ///
    /// ```rust,ignore
    /// assert_eq!(TermType::Filter.to_u64(), 39);
    /// ```
    pub fn to_u64(self) -> u64 {
        self as u64
    }

    /// Lower-case method name used by the query printer (`GET_ALL` -> `get_all`).
    pub fn method_name(&self) -> String {
        self.name().to_ascii_lowercase()
    }

    /// Terms printed as `r.name(...)` rather than as a method on their first argument.
    pub fn is_top_level(&self) -> bool {
        matches!(
            self,
            TermType::Db
                | TermType::DbCreate
                | TermType::DbDrop
                | TermType::DbList
                | TermType::Table
                | TermType::TableCreate
                | TermType::TableDrop
                | TermType::TableList
                | TermType::Javascript
                | TermType::Error
                | TermType::Branch
                | TermType::Json
                | TermType::Iso8601
                | TermType::EpochTime
                | TermType::Now
                | TermType::Time
                | TermType::Literal
                | TermType::Object
                | TermType::Random
                | TermType::Http
                | TermType::Args
                | TermType::Binary
                | TermType::Geojson
                | TermType::Uuid
                | TermType::Range
                | TermType::Minval
                | TermType::Maxval
                | TermType::Asc
                | TermType::Desc
                | TermType::Grant
        )
    }

    /// Operator symbol for terms printed infix, e.g. `(a == b)`.
    pub fn infix_operator(&self) -> Option<&'static str> {
        match self {
            TermType::Eq => Some("=="),
            TermType::Ne => Some("!="),
            TermType::Lt => Some("<"),
            TermType::Le => Some("<="),
            TermType::Gt => Some(">"),
            TermType::Ge => Some(">="),
            TermType::Add => Some("+"),
            TermType::Sub => Some("-"),
            TermType::Mul => Some("*"),
            TermType::Div => Some("/"),
            TermType::Mod => Some("%"),
            TermType::And => Some("&"),
            TermType::Or => Some("|"),
            _ => None,
        }
    }
}

impl std::fmt::Display for TermType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
