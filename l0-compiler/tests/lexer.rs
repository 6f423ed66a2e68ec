use l0_compiler::{Lexer, SourceFile, SourceId, TokenKind};

fn tokenize(source: &str) -> Vec<l0_compiler::Token> {
    let file = SourceFile::new(SourceId(0), "test.l0".into(), source.to_string());
    let mut lexer = Lexer::new(&file);
    lexer.tokenize().expect("lexing should succeed")
}

#[test]
fn tokens_carry_visual_positions() {
    let tokens = tokenize("module m;\nfunc main() {\n}\n");
    let module = &tokens[0];
    assert_eq!(module.lexeme, "module");
    assert_eq!((module.line, module.column), (1, 1));

    let func = tokens
        .iter()
        .find(|t| t.lexeme == "func")
        .expect("func token");
    assert_eq!((func.line, func.column), (2, 1));

    let lparen = tokens
        .iter()
        .find(|t| t.kind == TokenKind::LParen)
        .expect("paren token");
    assert_eq!((lparen.line, lparen.column), (2, 10));
}

#[test]
fn two_character_operators() {
    let tokens = tokenize("== != <= >= && || -> => ::");
    let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind.clone()).collect();
    assert_eq!(
        &kinds[..9],
        &[
            TokenKind::EqEq,
            TokenKind::Ne,
            TokenKind::Le,
            TokenKind::Ge,
            TokenKind::AndAnd,
            TokenKind::OrOr,
            TokenKind::Arrow,
            TokenKind::FatArrow,
            TokenKind::DoubleColon,
        ]
    );
}

#[test]
fn reserved_operators_are_lexed_not_rejected() {
    let tokens = tokenize("& | ^ ~ << >>");
    let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind.clone()).collect();
    assert_eq!(
        &kinds[..6],
        &[
            TokenKind::Amp,
            TokenKind::Pipe,
            TokenKind::Caret,
            TokenKind::Tilde,
            TokenKind::Shl,
            TokenKind::Shr,
        ]
    );
}

#[test]
fn negative_integer_literal_folds() {
    let tokens = tokenize("let x = -42;");
    assert!(tokens.iter().any(|t| t.kind == TokenKind::Int(-42)));

    // The most negative 32-bit value must lex.
    let tokens = tokenize("-2147483648");
    assert_eq!(tokens[0].kind, TokenKind::Int(i32::MIN));
}

#[test]
fn minus_before_identifier_stays_an_operator() {
    let tokens = tokenize("a - b");
    assert!(tokens.iter().any(|t| t.kind == TokenKind::Minus));
}

#[test]
fn integer_range_is_checked() {
    let file = SourceFile::new(SourceId(0), "test.l0".into(), "2147483648".to_string());
    let error = Lexer::new(&file).tokenize().expect_err("out of range");
    assert_eq!(error.code(), "LEX-0060");
}

#[test]
fn unterminated_string_reports_opening_quote() {
    let file = SourceFile::new(
        SourceId(0),
        "test.l0".into(),
        "let s = \"abc\nlet t = 1;".to_string(),
    );
    let error = Lexer::new(&file).tokenize().expect_err("unterminated");
    assert_eq!(error.code(), "LEX-0010");
    assert_eq!((error.line(), error.column()), (1, 9));
}

#[test]
fn string_escapes_are_preserved_in_payload() {
    let tokens = tokenize("\"a\\n\\x41\\101\"");
    match &tokens[0].kind {
        TokenKind::Str(payload) => assert_eq!(payload, "a\\n\\x41\\101"),
        other => panic!("expected string token, got {other:?}"),
    }
}

#[test]
fn unknown_escape_is_rejected() {
    let file = SourceFile::new(SourceId(0), "test.l0".into(), "\"\\q\"".to_string());
    let error = Lexer::new(&file).tokenize().expect_err("bad escape");
    assert_eq!(error.code(), "LEX-0059");
}

#[test]
fn byte_literal_must_be_single_byte() {
    let tokens = tokenize("'a' '\\n' '\\x41'");
    let bytes: Vec<&TokenKind> = tokens
        .iter()
        .filter(|t| matches!(t.kind, TokenKind::Byte(_)))
        .map(|t| &t.kind)
        .collect();
    assert_eq!(bytes.len(), 3);

    let file = SourceFile::new(SourceId(0), "test.l0".into(), "'ab'".to_string());
    let error = Lexer::new(&file).tokenize().expect_err("two bytes");
    assert_eq!(error.code(), "LEX-0021");
}

#[test]
fn block_comments_nest_within_lines() {
    let tokens = tokenize("a /* comment \n spanning lines */ b");
    let idents: Vec<&str> = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Identifier)
        .map(|t| t.lexeme.as_str())
        .collect();
    assert_eq!(idents, ["a", "b"]);

    let file = SourceFile::new(SourceId(0), "test.l0".into(), "/* open".to_string());
    let error = Lexer::new(&file).tokenize().expect_err("unterminated");
    assert_eq!(error.code(), "LEX-0070");
}

#[test]
fn bom_is_discarded() {
    let file = SourceFile::new(SourceId(0), "test.l0".into(), "\u{feff}module m;".to_string());
    let mut lexer = Lexer::new(&file);
    let tokens = lexer.tokenize().expect("lexes");
    assert_eq!(tokens[0].lexeme, "module");
    assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
}

#[test]
fn future_reserved_words_get_their_own_kind() {
    let tokens = tokenize("const uint in");
    assert!(tokens[..3]
        .iter()
        .all(|t| t.kind == TokenKind::FutureReserved));
}

#[test]
fn wildcard_is_distinct_from_identifier() {
    let tokens = tokenize("_ _x");
    assert_eq!(tokens[0].kind, TokenKind::Wildcard);
    assert_eq!(tokens[1].kind, TokenKind::Identifier);
}
