use core::ops::Bound;
use core::str::FromStr;
use std::collections::HashMap;
use std::io::Read;

use tracing::{debug, trace};

use crate::schema_lexer::{Lexer, Token, TokenKind};
use crate::schema_types::{
    Cardinality, ElementDef, ElementId, ElementType, Edtd, Interval, RangeParam,
};
use crate::stream::parse;

/// Elements every EBML stream may contain, compiled ahead of any user schema.
const BOOTSTRAP_SCHEMA: &str = r#"
define elements {
    EBML := 1a45dfa3 container [ card:1; ] {
        EBMLVersion := 4286 uint [ def:1; ]
        EBMLReadVersion := 42f7 uint [ def:1; ]
        EBMLMaxIDLength := 42f2 uint [ def:4; ]
        EBMLMaxSizeLength := 42f3 uint [ def:8; ]
        DocType := 4282 string [ range:32..126; ]
        DocTypeVersion := 4287 uint [ def:1; ]
        DocTypeReadVersion := 4285 uint [ def:1; ]
    }

    // re-includes the children of wherever it appears
    CRC32 := c3 container [ level:1..; card:*; ] {
        %children;
        CRC32Value := 42fe binary [ size:4; ]
    }

    Void := ec binary [ level:1..; card:*; ]
}
"#;

#[derive(thiserror::Error, Debug)]
pub enum SchemaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lexical error: {0}")]
    Lexical(String),
    #[error("expected {expected} but found {found}")]
    UnexpectedToken { expected: String, found: Token },
    #[error("unknown type '{0}'")]
    UnknownType(String),
    #[error("invalid element ID '{0}'")]
    InvalidId(String),
    #[error("invalid {element_type} literal '{literal}'")]
    InvalidLiteral {
        element_type: ElementType,
        literal: String,
    },
    #[error("default values are not supported for {0} elements")]
    UnsupportedDefault(ElementType),
    #[error("ranges are not supported for {0} elements")]
    UnsupportedRange(ElementType),
    #[error("unknown cardinality {0}")]
    UnknownCardinality(Token),
    #[error("{0} is not a container and cannot have children")]
    UnexpectedChildren(String),
    #[error("container {name} must open its children with '{{' but found {found}")]
    MissingChildren { name: String, found: Token },
    #[error("header refers to unknown element '{0}'")]
    UnknownElement(String),
}

fn unexpected(expected: impl Into<String>, found: Token) -> SchemaError {
    SchemaError::UnexpectedToken {
        expected: expected.into(),
        found,
    }
}

fn describe(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::AlphaNum => "an identifier or number",
        TokenKind::Control => "punctuation",
        TokenKind::QuotedString => "a quoted string",
        TokenKind::Eof => "end of input",
        TokenKind::Error => "a valid token",
    }
}

/// Element definitions in the order they were declared. A parent takes its
/// slot before its children, so on an ID collision the later declaration
/// wins once the slots are folded into the ID map.
#[derive(Debug, Default)]
struct Definitions {
    slots: Vec<Option<ElementDef>>,
}

impl Definitions {
    fn reserve(&mut self) -> usize {
        self.slots.push(None);
        self.slots.len() - 1
    }

    fn fill(&mut self, slot: usize, def: ElementDef) {
        self.slots[slot] = Some(def);
    }

    fn find_by_name(&self, name: &str) -> Option<&ElementDef> {
        self.slots.iter().rev().flatten().find(|def| def.name == name)
    }

    /// Sets the default of every definition named `name`, nested copies included.
    fn apply_default(&mut self, name: &str, default: &[u8]) {
        fn visit(def: &mut ElementDef, name: &str, default: &[u8]) {
            if def.name == name {
                def.default = Some(default.to_vec());
            }
            for child in def.children.iter_mut().flatten() {
                visit(child, name, default);
            }
        }

        for def in self.slots.iter_mut().flatten() {
            visit(def, name, default);
        }
    }

    fn into_map(self) -> HashMap<ElementId, ElementDef> {
        self.slots
            .into_iter()
            .flatten()
            .map(|def| (def.id, def))
            .collect()
    }
}

#[derive(Debug, Default)]
struct SchemaBuilder {
    definitions: Definitions,
    types: HashMap<String, ElementDef>,
}

impl SchemaBuilder {
    fn build(self) -> Edtd {
        Edtd {
            elements: self.definitions.into_map(),
            types: self.types,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Declaring {
    Elements,
    Types,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

#[derive(Debug, Clone, PartialEq)]
struct RangeBound {
    comparison: Option<Comparison>,
    literal: String,
}

impl RangeBound {
    fn to_interval<T>(&self, element_type: ElementType) -> Result<Interval<T>, SchemaError>
    where
        T: lexical_core::FromLexical + Clone,
    {
        let value = |literal: &str| parse_number::<T>(element_type, literal);
        let endpoint = |literal: &str| match literal {
            "" => Ok(Bound::Unbounded),
            _ => value(literal).map(Bound::Included),
        };

        Ok(match self.comparison {
            Some(Comparison::Greater) => {
                Interval::new(Bound::Excluded(value(&self.literal)?), Bound::Unbounded)
            }
            Some(Comparison::GreaterOrEqual) => {
                Interval::new(Bound::Included(value(&self.literal)?), Bound::Unbounded)
            }
            Some(Comparison::Less) => {
                Interval::new(Bound::Unbounded, Bound::Excluded(value(&self.literal)?))
            }
            Some(Comparison::LessOrEqual) => {
                Interval::new(Bound::Unbounded, Bound::Included(value(&self.literal)?))
            }
            None => match self.literal.split_once("..") {
                Some((start, end)) => Interval::new(endpoint(start)?, endpoint(end)?),
                None => Interval::exactly(value(&self.literal)?),
            },
        })
    }
}

fn range_param(element_type: ElementType, bounds: &[RangeBound]) -> Result<RangeParam, SchemaError> {
    Ok(match element_type {
        ElementType::Int | ElementType::Date => RangeParam::Int(
            bounds
                .iter()
                .map(|bound| bound.to_interval(element_type))
                .collect::<Result<_, _>>()?,
        ),
        ElementType::UInt | ElementType::String | ElementType::Binary => RangeParam::UInt(
            bounds
                .iter()
                .map(|bound| bound.to_interval(element_type))
                .collect::<Result<_, _>>()?,
        ),
        ElementType::Float => RangeParam::Float(
            bounds
                .iter()
                .map(|bound| bound.to_interval(element_type))
                .collect::<Result<_, _>>()?,
        ),
        ElementType::Container => return Err(SchemaError::UnsupportedRange(element_type)),
    })
}

fn parse_number<T: lexical_core::FromLexical>(
    element_type: ElementType,
    literal: &str,
) -> Result<T, SchemaError> {
    lexical_core::parse(literal.as_bytes()).map_err(|_| SchemaError::InvalidLiteral {
        element_type,
        literal: literal.to_string(),
    })
}

/// Decodes a hex literal as a single vint, e.g. `1a45dfa3` -> `0x0a45dfa3`.
fn parse_id(token: &Token) -> Result<ElementId, SchemaError> {
    let invalid = || SchemaError::InvalidId(token.text.clone());
    let bytes = hex::decode(&token.text).map_err(|_| invalid())?;
    match parse::vint(&bytes) {
        Ok((rest, (id, _))) if rest.is_empty() && id != 0 => Ok(id),
        _ => Err(invalid()),
    }
}

/// Resolves the escapes of a quoted-string token (quotes included).
fn unquote(literal: &str) -> Result<Vec<u8>, SchemaError> {
    let invalid = || SchemaError::InvalidLiteral {
        element_type: ElementType::String,
        literal: literal.to_string(),
    };
    let body = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(invalid)?;

    let mut bytes = Vec::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        let c = match c {
            '\\' => match chars.next().ok_or_else(invalid)? {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                '\\' => '\\',
                '"' => '"',
                '\'' => '\'',
                'x' => {
                    let digits: String = chars.by_ref().take(2).collect();
                    let mut byte = [0u8];
                    hex::decode_to_slice(&digits, &mut byte).map_err(|_| invalid())?;
                    bytes.push(byte[0]);
                    continue;
                }
                _ => return Err(invalid()),
            },
            c => c,
        };
        let mut buffer = [0u8; 4];
        bytes.extend_from_slice(c.encode_utf8(&mut buffer).as_bytes());
    }
    Ok(bytes)
}

fn parse_cardinality(token: &Token) -> Result<Cardinality, SchemaError> {
    match &token.text[..] {
        "*" => Ok(Cardinality::ZeroOrMore),
        "?" => Ok(Cardinality::ZeroOrOne),
        "1" => Ok(Cardinality::ExactlyOne),
        "+" => Ok(Cardinality::OneOrMore),
        _ => Err(SchemaError::UnknownCardinality(token.clone())),
    }
}

/// Encodes a default value the way the element stores it: 8 big-endian
/// bytes for numbers, raw bytes for strings and binaries.
fn parse_default(element_type: ElementType, token: &Token) -> Result<Vec<u8>, SchemaError> {
    match element_type {
        ElementType::Int => Ok(parse_number::<i64>(element_type, &token.text)?
            .to_be_bytes()
            .to_vec()),
        ElementType::UInt => Ok(parse_number::<u64>(element_type, &token.text)?
            .to_be_bytes()
            .to_vec()),
        ElementType::Float => Ok(parse_number::<f64>(element_type, &token.text)?
            .to_be_bytes()
            .to_vec()),
        ElementType::String | ElementType::Binary => match token.kind {
            TokenKind::QuotedString => unquote(&token.text),
            TokenKind::AlphaNum if token.text.starts_with("0x") => hex::decode(&token.text[2..])
                .map_err(|_| SchemaError::InvalidLiteral {
                    element_type,
                    literal: token.text.clone(),
                }),
            _ => Err(unexpected(
                "a quoted string or a 0x-prefixed hex literal",
                token.clone(),
            )),
        },
        ElementType::Date | ElementType::Container => {
            Err(SchemaError::UnsupportedDefault(element_type))
        }
    }
}

/// Recursive-descent parser over one EDTD source text.
struct Compiler<'a> {
    lexer: Lexer<'a>,
}

impl<'a> Compiler<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lexer: Lexer::new(source),
        }
    }

    fn next(&mut self) -> Result<Token, SchemaError> {
        let token = self.lexer.next_token();
        token
            .as_error()
            .map_err(|message| SchemaError::Lexical(message.to_string()))?;
        Ok(token)
    }

    fn expect(&mut self, expected: &[(TokenKind, &str)]) -> Result<Token, SchemaError> {
        let token = self.next()?;
        if expected.iter().any(|&(kind, text)| token.is(kind, text)) {
            return Ok(token);
        }
        let expected = expected
            .iter()
            .map(|(_, text)| format!("'{}'", text))
            .collect::<Vec<_>>()
            .join(" or ");
        Err(unexpected(expected, token))
    }

    fn expect_control(&mut self, text: &str) -> Result<Token, SchemaError> {
        self.expect(&[(TokenKind::Control, text)])
    }

    fn expect_kind(&mut self, kinds: &[TokenKind]) -> Result<Token, SchemaError> {
        let token = self.next()?;
        if kinds.contains(&token.kind) {
            return Ok(token);
        }
        let expected = kinds
            .iter()
            .map(|&kind| describe(kind))
            .collect::<Vec<_>>()
            .join(" or ");
        Err(unexpected(expected, token))
    }

    fn parse_blocks(&mut self, schema: &mut SchemaBuilder) -> Result<(), SchemaError> {
        loop {
            let token = self.next()?;
            if token.kind == TokenKind::Eof {
                return Ok(());
            }
            if !token.is(TokenKind::AlphaNum, "declare") && !token.is(TokenKind::AlphaNum, "define")
            {
                return Err(unexpected("'declare' or 'define'", token));
            }

            let block = self.expect(&[
                (TokenKind::AlphaNum, "elements"),
                (TokenKind::AlphaNum, "header"),
                (TokenKind::AlphaNum, "types"),
            ])?;
            self.expect_control("{")?;

            match &block.text[..] {
                "elements" => {
                    let SchemaBuilder { definitions, types } = &mut *schema;
                    self.parse_elements(definitions, types, Declaring::Elements)?;
                }
                "header" => self.parse_header(schema)?,
                _ => self.parse_types(schema)?,
            }
        }
    }

    /// Each `NAME := VALUE;` entry overrides the default of a defined element.
    fn parse_header(&mut self, schema: &mut SchemaBuilder) -> Result<(), SchemaError> {
        loop {
            let name = self.next()?;
            if name.is_control("}") {
                return Ok(());
            }
            if name.kind != TokenKind::AlphaNum {
                return Err(unexpected("an element name or '}'", name));
            }
            self.expect_control(":=")?;
            let value = self.expect_kind(&[TokenKind::AlphaNum, TokenKind::QuotedString])?;
            self.expect_control(";")?;

            let element_type = schema
                .definitions
                .find_by_name(&name.text)
                .map(|def| def.element_type)
                .ok_or_else(|| SchemaError::UnknownElement(name.text.clone()))?;
            let default = parse_default(element_type, &value)?;
            debug!(element = %name.text, "header overrides default value");
            schema.definitions.apply_default(&name.text, &default);
        }
    }

    /// Aliases are registered one by one, so later entries of the same block
    /// may build on earlier ones. Their children never reach the ID map.
    fn parse_types(&mut self, schema: &mut SchemaBuilder) -> Result<(), SchemaError> {
        let mut scratch = Definitions::default();
        while let Some(def) = self.parse_element(&mut scratch, &schema.types, Declaring::Types)? {
            schema.types.insert(def.name.to_lowercase(), def);
        }
        Ok(())
    }

    fn parse_elements(
        &mut self,
        definitions: &mut Definitions,
        types: &HashMap<String, ElementDef>,
        declaring: Declaring,
    ) -> Result<Vec<ElementDef>, SchemaError> {
        let mut elements = Vec::new();
        while let Some(def) = self.parse_element(definitions, types, declaring)? {
            elements.push(def);
        }
        Ok(elements)
    }

    /// Parses one declaration, or returns `None` on the `}` closing the
    /// enclosing list.
    fn parse_element(
        &mut self,
        definitions: &mut Definitions,
        types: &HashMap<String, ElementDef>,
        declaring: Declaring,
    ) -> Result<Option<ElementDef>, SchemaError> {
        let name = loop {
            let token = self.next()?;
            if token.is_control("}") {
                return Ok(None);
            }
            if token.is_control("%") {
                self.expect(&[(TokenKind::AlphaNum, "children")])?;
                self.expect_control(";")?;
                continue;
            }
            if token.kind != TokenKind::AlphaNum {
                return Err(unexpected("an element name or '}'", token));
            }
            break token.text;
        };
        self.expect_control(":=")?;

        let id = match declaring {
            Declaring::Types => 0,
            Declaring::Elements => parse_id(&self.expect_kind(&[TokenKind::AlphaNum])?)?,
        };

        let type_name = self.expect_kind(&[TokenKind::AlphaNum])?.text;
        let mut def = match ElementType::from_str(&type_name) {
            Ok(element_type) => ElementDef::new(id, element_type, name),
            Err(_) => {
                let mut def = types
                    .get(&type_name.to_lowercase())
                    .cloned()
                    .ok_or(SchemaError::UnknownType(type_name))?;
                def.id = id;
                def.name = name;
                def
            }
        };
        let slot = definitions.reserve();

        let control = self.expect_kind(&[TokenKind::Control])?;
        match &control.text[..] {
            ";" => {}
            "[" => {
                self.parse_params(&mut def)?;
                if def.is_container() {
                    let open = self.next()?;
                    if !open.is_control("{") {
                        return Err(SchemaError::MissingChildren {
                            name: def.name,
                            found: open,
                        });
                    }
                    def.children = Some(self.parse_elements(definitions, types, declaring)?);
                }
            }
            "{" if def.is_container() => {
                def.children = Some(self.parse_elements(definitions, types, declaring)?);
            }
            "{" => return Err(SchemaError::UnexpectedChildren(def.name)),
            _ => return Err(unexpected("';', '[' or '{'", control)),
        }

        definitions.fill(slot, def.clone());
        Ok(Some(def))
    }

    fn parse_params(&mut self, def: &mut ElementDef) -> Result<(), SchemaError> {
        loop {
            let name = self.next()?;
            if name.is_control("]") {
                return Ok(());
            }
            if name.kind != TokenKind::AlphaNum {
                return Err(unexpected("a parameter name or ']'", name));
            }
            self.expect_control(":")?;
            let value = self.expect_kind(&[
                TokenKind::AlphaNum,
                TokenKind::QuotedString,
                TokenKind::Control,
            ])?;

            match &name.text[..] {
                "card" => {
                    def.cardinality = parse_cardinality(&value)?;
                    self.expect_control(";")?;
                }
                "def" => {
                    def.default = Some(parse_default(def.element_type, &value)?);
                    self.expect_control(";")?;
                }
                "size" => {
                    def.size = parse_number(ElementType::UInt, &value.text)?;
                    self.expect_control(";")?;
                }
                "range" => {
                    let bounds = self.parse_range_bounds(value)?;
                    def.range = Some(range_param(def.element_type, &bounds)?);
                }
                _ => {
                    trace!(param = %name.text, element = %def.name, "ignoring unrecognized parameter");
                    self.skip_param(value)?;
                }
            }
        }
    }

    /// Reads `BOUND ("," BOUND)* ";"` starting from an already-consumed token.
    fn parse_range_bounds(&mut self, first: Token) -> Result<Vec<RangeBound>, SchemaError> {
        let mut bounds = vec![self.parse_range_bound(first)?];
        loop {
            let separator = self.expect(&[(TokenKind::Control, ";"), (TokenKind::Control, ",")])?;
            if separator.text == ";" {
                return Ok(bounds);
            }
            let token = self.next()?;
            bounds.push(self.parse_range_bound(token)?);
        }
    }

    fn parse_range_bound(&mut self, token: Token) -> Result<RangeBound, SchemaError> {
        let comparison = match token.kind {
            TokenKind::AlphaNum => None,
            TokenKind::Control => Some(match &token.text[..] {
                "<" => Comparison::Less,
                "<=" => Comparison::LessOrEqual,
                ">" => Comparison::Greater,
                ">=" => Comparison::GreaterOrEqual,
                _ => return Err(unexpected("a range bound", token)),
            }),
            _ => return Err(unexpected("a range bound", token)),
        };
        let literal = match comparison {
            Some(_) => self.expect_kind(&[TokenKind::AlphaNum])?.text,
            None => token.text,
        };
        Ok(RangeBound {
            comparison,
            literal,
        })
    }

    /// Discards everything up to the `;` ending an unrecognized parameter.
    fn skip_param(&mut self, mut token: Token) -> Result<(), SchemaError> {
        loop {
            if token.is_control(";") {
                return Ok(());
            }
            if token.kind == TokenKind::Eof || token.is_control("]") {
                return Err(unexpected("';'", token));
            }
            token = self.next()?;
        }
    }
}

/// Compiles EDTD source on top of the implicit `EBML`, `CRC32` and `Void`
/// definitions.
pub fn compile(source: &str) -> Result<Edtd, SchemaError> {
    let mut schema = SchemaBuilder::default();
    Compiler::new(BOOTSTRAP_SCHEMA).parse_blocks(&mut schema)?;
    Compiler::new(source).parse_blocks(&mut schema)?;

    let edtd = schema.build();
    debug!(
        elements = edtd.elements.len(),
        types = edtd.types.len(),
        "compiled EDTD schema"
    );
    Ok(edtd)
}

impl FromStr for Edtd {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        compile(s)
    }
}

impl Edtd {
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, SchemaError> {
        let mut source = String::new();
        reader.read_to_string(&mut source)?;
        compile(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_types::{CRC32_ID, EBML_ID, VOID_ID};
    use rstest::*;

    const MATROSKA_EXCERPT: &str = r#"
        define types {
            bool := uint [ range:0..1; ]
            ascii := string [ range:32..126; ]
            flag := bool [ card:?; ]
        }

        define elements {
            Segment := 18538067 container [ card:*; ] {
                Info := 1549a966 container [ card:*; ] {
                    TimecodeScale := 2ad7b1 uint [ def:1000000; ]
                    Duration := 4489 float [ range:>0.0; ]
                    Title := 7ba9 string;
                }
                Tracks := 1654ae6b container {
                    FlagEnabled := b9 bool;
                    FlagLacing := 9c flag [ def:1; ]
                    Language := 22b59c ascii [ def:"eng"; ]
                }
            }
        }
    "#;

    fn compiled() -> Edtd {
        compile(MATROSKA_EXCERPT).expect("failed to compile schema")
    }

    #[test]
    fn implicit_elements_without_user_schema() {
        let edtd = compile("").unwrap();

        let ebml = edtd.definition_for_id(EBML_ID).unwrap();
        assert_eq!(ebml.name, "EBML");
        assert_eq!(ebml.element_type, ElementType::Container);
        assert_eq!(ebml.cardinality, Cardinality::ExactlyOne);
        assert_eq!(
            ebml.children()
                .iter()
                .map(|child| &child.name[..])
                .collect::<Vec<_>>(),
            vec![
                "EBMLVersion",
                "EBMLReadVersion",
                "EBMLMaxIDLength",
                "EBMLMaxSizeLength",
                "DocType",
                "DocTypeVersion",
                "DocTypeReadVersion",
            ]
        );

        let crc32 = edtd.definition_for_id(CRC32_ID).unwrap();
        assert_eq!(crc32.cardinality, Cardinality::ZeroOrMore);
        assert_eq!(crc32.children().len(), 1);
        assert_eq!(crc32.children()[0].name, "CRC32Value");
        assert_eq!(crc32.children()[0].size, 4);

        let void = edtd.definition_for_id(VOID_ID).unwrap();
        assert_eq!(void.element_type, ElementType::Binary);
        assert_eq!(void.cardinality, Cardinality::ZeroOrMore);
        assert_eq!(void.children, None);
    }

    #[test]
    fn header_children_are_in_flat_map() {
        let edtd = compile("").unwrap();

        let version = edtd.definition_for_id(0x0286).unwrap();
        assert_eq!(version.name, "EBMLVersion");
        assert_eq!(version.default_uint(), Some(1));
        assert_eq!(version.default, Some(vec![0, 0, 0, 0, 0, 0, 0, 1]));

        let doc_type = edtd.definition_for_id(0x0282).unwrap();
        assert_eq!(
            doc_type.range,
            Some(RangeParam::UInt(vec![Interval::new(
                Bound::Included(32),
                Bound::Included(126)
            )]))
        );
        assert_eq!(edtd.definition_for_id(0x02FE).unwrap().name, "CRC32Value");
    }

    #[test]
    fn compiling_twice_is_identical() {
        assert_eq!(compiled(), compiled());
    }

    #[test]
    fn nested_definitions() {
        let edtd = compiled();

        let segment = edtd.definition_for_id(0x0853_8067).unwrap();
        assert_eq!(segment.cardinality, Cardinality::ZeroOrMore);
        let info = segment.child(0x0549_A966).unwrap();
        assert_eq!(info.children().len(), 3);
        assert_eq!(edtd.definition_for_id(0x0549_A966), Some(info));

        let scale = edtd.definition_for_id(0x0AD7B1).unwrap();
        assert_eq!(scale.default_uint(), Some(1_000_000));

        let duration = edtd.definition_for_id(0x0489).unwrap();
        assert_eq!(
            duration.range,
            Some(RangeParam::Float(vec![Interval::new(
                Bound::Excluded(0.0),
                Bound::Unbounded
            )]))
        );

        let title = edtd.definition_for_id(0x3BA9).unwrap();
        assert_eq!(title.element_type, ElementType::String);
        assert_eq!(title.cardinality, Cardinality::ExactlyOne);
    }

    #[test]
    fn alias_copies_template() {
        let edtd = compiled();

        let alias = edtd.definition_for_type_name("BOOL").unwrap();
        let enabled = edtd.definition_for_id(0x39).unwrap();

        let mut expected = alias.clone();
        expected.id = 0x39;
        expected.name = "FlagEnabled".to_string();
        assert_eq!(enabled, &expected);
        assert_eq!(alias.id, 0);
        assert_eq!(alias.name, "bool");
    }

    #[test]
    fn alias_of_alias_with_overrides() {
        let edtd = compiled();

        let flag = edtd.definition_for_type_name("flag").unwrap();
        assert_eq!(flag.element_type, ElementType::UInt);
        assert_eq!(flag.cardinality, Cardinality::ZeroOrOne);
        assert!(flag.range.is_some());

        let lacing = edtd.definition_for_id(0x1C).unwrap();
        assert_eq!(lacing.cardinality, Cardinality::ZeroOrOne);
        assert_eq!(lacing.default_uint(), Some(1));
        assert_eq!(flag.default, None);

        let language = edtd.definition_for_id(0x02B59C).unwrap();
        assert_eq!(language.default_string(), Some("eng".to_string()));
        assert!(language.range.as_ref().unwrap().admits_str("eng"));
    }

    #[test]
    fn nested_ids_share_one_namespace() {
        let edtd = compile(
            r#"
            define elements {
                Outer := 81 container {
                    Inner := 81 uint;
                    Shared := 82 uint;
                }
                Later := 82 string;
            }
            "#,
        )
        .unwrap();

        assert_eq!(edtd.definition_for_id(0x01).unwrap().name, "Inner");
        assert_eq!(edtd.definition_for_id(0x02).unwrap().name, "Later");
    }

    #[test]
    fn container_children_materialized() {
        let edtd = compile(
            r#"
            declare elements {
                Empty := 81 container;
                Bracketed := 82 container [ card:?; ] { }
                Leaf := 83 binary [ size:16; ]
            }
            "#,
        )
        .unwrap();

        assert_eq!(edtd.definition_for_id(0x01).unwrap().children, Some(vec![]));
        assert_eq!(edtd.definition_for_id(0x02).unwrap().children, Some(vec![]));
        let leaf = edtd.definition_for_id(0x03).unwrap();
        assert_eq!(leaf.children, None);
        assert_eq!(leaf.size, 16);
    }

    #[test]
    fn unknown_parameters_are_ignored() {
        let edtd = compile(
            r#"
            define elements {
                Odd := 81 uint [ level:1..; ordered: yes, no; card:?; note:"x"; ]
            }
            "#,
        )
        .unwrap();

        let odd = edtd.definition_for_id(0x01).unwrap();
        assert_eq!(odd.cardinality, Cardinality::ZeroOrOne);
    }

    #[rstest]
    #[case(ElementType::Int, "-5", (-5i64).to_be_bytes().to_vec())]
    #[case(ElementType::UInt, "42", 42u64.to_be_bytes().to_vec())]
    #[case(ElementType::Float, "1.5", 1.5f64.to_be_bytes().to_vec())]
    #[case(ElementType::String, r#""a\tb\"c""#, b"a\tb\"c".to_vec())]
    #[case(ElementType::Binary, "0x00ff10", vec![0x00, 0xff, 0x10])]
    #[case(ElementType::Binary, r#""\x01\xff""#, vec![0x01, 0xff])]
    #[case(ElementType::Binary, "0xABcd", vec![0xab, 0xcd])]
    #[case(ElementType::Binary, "0x", vec![])]
    #[case(ElementType::String, r#""""#, vec![])]
    fn default_encoding(
        #[case] element_type: ElementType,
        #[case] literal: &'static str,
        #[case] expt: Vec<u8>,
    ) {
        let source = format!(
            "define elements {{ Value := 81 {} [ def:{}; ] }}",
            element_type, literal
        );
        let edtd = compile(&source).unwrap();
        assert_eq!(edtd.definition_for_id(0x01).unwrap().default, Some(expt));
    }

    #[rstest]
    #[case("0x0")]
    #[case("0xzz")]
    #[case(r#""\x4""#)]
    #[case(r#""\xg1""#)]
    fn invalid_binary_defaults(#[case] literal: &'static str) {
        let source = format!("define elements {{ Value := 81 binary [ def:{}; ] }}", literal);
        assert!(matches!(
            compile(&source),
            Err(SchemaError::InvalidLiteral { .. })
        ));
    }

    #[test]
    fn iterates_compiled_schema() {
        let edtd = compiled();

        let mut names = edtd
            .elements()
            .filter(|def| def.id == 0x0853_8067 || def.id == 0x0549_A966)
            .map(|def| def.name.clone())
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, vec!["Info", "Segment"]);
        assert!(edtd.elements().any(|def| def.name == "CRC32Value"));

        let mut types = edtd.types().map(|(name, _)| name).collect::<Vec<_>>();
        types.sort_unstable();
        assert_eq!(types, vec!["ascii", "bool", "flag"]);
        assert!(edtd.types().all(|(_, def)| def.id == 0));
    }

    #[test]
    fn ranges_by_type() {
        let edtd = compile(
            r#"
            define elements {
                Offset := 81 int [ range: ..-1, 1..5, 10, >=100; ]
                Ratio := 82 float [ range:0.0..1.0, <-1.5; ]
            }
            "#,
        );
        // `..-1` lexes as `..` followed by `-1`
        assert!(matches!(edtd, Err(SchemaError::UnexpectedToken { .. })));

        let edtd = compile(
            r#"
            define elements {
                Offset := 81 int [ range: <0, 1..5, 10, >=100; ]
                Ratio := 82 float [ range:0.0..1.0, <-1.5; ]
            }
            "#,
        )
        .unwrap();

        let offset = edtd.definition_for_id(0x01).unwrap().range.clone().unwrap();
        assert_eq!(
            offset,
            RangeParam::Int(vec![
                Interval::new(Bound::Unbounded, Bound::Excluded(0)),
                Interval::new(Bound::Included(1), Bound::Included(5)),
                Interval::exactly(10),
                Interval::new(Bound::Included(100), Bound::Unbounded),
            ])
        );
        assert!(offset.admits_int(-3));
        assert!(!offset.admits_int(7));
        assert!(offset.admits_int(100));

        let ratio = edtd.definition_for_id(0x02).unwrap().range.clone().unwrap();
        assert!(ratio.admits_float(0.5));
        assert!(ratio.admits_float(-2.0));
        assert!(!ratio.admits_float(-1.0));
    }

    #[test]
    fn header_block_overrides_defaults() {
        let edtd = compile(
            r#"
            declare header {
                DocType := "matroska";
                EBMLMaxIDLength := 3;
            }
            "#,
        )
        .unwrap();

        let doc_type = edtd.definition_for_id(0x0282).unwrap();
        assert_eq!(doc_type.default_string(), Some("matroska".to_string()));

        let ebml = edtd.definition_for_id(EBML_ID).unwrap();
        assert_eq!(ebml.child(0x0282).unwrap().default, doc_type.default);
        assert_eq!(ebml.child(0x02F2).unwrap().default_uint(), Some(3));
    }

    #[test]
    fn from_reader() {
        let edtd = Edtd::from_reader(MATROSKA_EXCERPT.as_bytes()).unwrap();
        assert_eq!(edtd, compiled());
        assert_eq!(MATROSKA_EXCERPT.parse::<Edtd>().unwrap(), edtd);
    }

    #[test]
    fn unterminated_string() {
        let result = compile(r#"define elements { Language := 22b59c string [ def:"eng; ] }"#);
        assert!(matches!(result, Err(SchemaError::Lexical(_))));
    }

    #[test]
    fn unknown_type() {
        let result = compile("define elements { Mystery := 81 boolean; }");
        assert!(matches!(result, Err(SchemaError::UnknownType(name)) if name == "boolean"));
    }

    #[test]
    fn container_parameters_require_children() {
        let result = compile("define elements { Box := 81 container [ card:*; ] ; }");
        assert!(matches!(
            result,
            Err(SchemaError::MissingChildren { name, .. }) if name == "Box"
        ));
    }

    #[test]
    fn children_on_non_container() {
        let result = compile("define elements { Leaf := 81 uint { Kid := 82 uint; } }");
        assert!(matches!(
            result,
            Err(SchemaError::UnexpectedChildren(name)) if name == "Leaf"
        ));

        let result = compile("define elements { Leaf := 81 uint [ card:?; ] { } }");
        assert!(matches!(result, Err(SchemaError::UnexpectedToken { .. })));
    }

    #[rstest]
    #[case("zz")]
    #[case("8")]
    #[case("4000ff")]
    #[case("80")]
    #[case("00")]
    fn invalid_ids(#[case] id: &'static str) {
        let source = format!("define elements {{ Bad := {} uint; }}", id);
        assert!(matches!(compile(&source), Err(SchemaError::InvalidId(text)) if text == id));
    }

    #[rstest]
    #[case("elements { }")]
    #[case("define things { }")]
    #[case("define elements ; }")]
    #[case("define elements { A := 81 uint;")]
    #[case("define elements { A : 81 uint; }")]
    #[case("define elements { A := 81 uint [ card ?; ] }")]
    #[case("define elements { A := 81 uint [ range:1..2 ] }")]
    fn syntax_errors(#[case] source: &'static str) {
        assert!(matches!(
            compile(source),
            Err(SchemaError::UnexpectedToken { .. })
        ));
    }

    #[rstest]
    #[case("define elements { A := 81 uint [ card:x; ] }")]
    #[case("define elements { A := 81 date [ def:0; ] }")]
    #[case("define elements { A := 81 uint [ def:abc; ] }")]
    #[case("define elements { A := 81 container [ range:1..2; ] { } }")]
    #[case("declare header { Missing := 1; }")]
    fn semantic_errors(#[case] source: &'static str) {
        let result = compile(source);
        assert!(matches!(
            result,
            Err(SchemaError::UnknownCardinality(_))
                | Err(SchemaError::UnsupportedDefault(ElementType::Date))
                | Err(SchemaError::InvalidLiteral { .. })
                | Err(SchemaError::UnsupportedRange(ElementType::Container))
                | Err(SchemaError::UnknownElement(_))
        ));
    }
}
