use chumsky::{input::ValueInput, pratt::*, prelude::*, recursive::Indirect};
use std::cell::OnceCell;
use std::ops::Range;
use std::rc::Rc;

mod lexer;
pub use lexer::{Token, lexer};

mod source;
pub use source::SourceCode;

pub use chumsky::prelude::{Input, Parser};

pub type Span = SimpleSpan;
pub type ParseError<'code, T> = Rich<'code, T, Span>;

type TokenExtra<'code> = extra::Err<ParseError<'code, Token<'code>>>;

#[derive(Debug, Clone)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

fn spanned<T>(node: T, span: Span) -> Spanned<T> {
    Spanned { node, span }
}

/// A lexing or parsing failure with an owned message and a byte range into the
/// parsed text.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxIssue {
    pub message: String,
    pub reason: String,
    pub range: Range<usize>,
}

impl SyntaxIssue {
    fn from_rich<T: std::fmt::Display>(error: &ParseError<'_, T>, shift: usize) -> Self {
        let range = error.span().into_range();
        Self {
            message: error.to_string(),
            reason: error.reason().to_string(),
            range: range.start + shift..range.end + shift,
        }
    }
}

/// Deepest nesting of brackets and operators a script may reach. Parsing,
/// evaluating and dropping a syntax tree each recurse once per level.
pub const MAX_NESTING_DEPTH: usize = 256;

/// Parses a complete script.
pub fn parse_program(source_code: &str) -> Result<Vec<Spanned<Statement>>, Vec<SyntaxIssue>> {
    parse_program_at(source_code, 0)
}

/// Parses `source_code` as if it started at byte `offset` of a larger text, so
/// every span in the result (and in the returned issues) refers to the larger
/// text.
pub fn parse_program_at(
    source_code: &str,
    offset: usize,
) -> Result<Vec<Spanned<Statement>>, Vec<SyntaxIssue>> {
    let (tokens, errors) = lexer().parse(source_code).into_output_errors();
    if !errors.is_empty() {
        return Err(errors
            .iter()
            .map(|error| SyntaxIssue::from_rich(error, offset))
            .collect());
    }
    let Some(mut tokens) = tokens else {
        return Err(Vec::new());
    };

    tokens.retain(|spanned_token| !matches!(spanned_token.node, Token::Comment(_)));
    if offset > 0 {
        for token in &mut tokens {
            token.span = Span::from(token.span.start + offset..token.span.end + offset);
        }
    }

    if let Some(issue) = nesting_issue(&tokens) {
        return Err(vec![issue]);
    }

    let end_of_input = source_code.len() + offset;
    let (ast, errors) = parser()
        .parse(tokens.map(
            Span::from(end_of_input..end_of_input),
            |Spanned { node, span }| (node, span),
        ))
        .into_output_errors();
    if !errors.is_empty() {
        return Err(errors
            .iter()
            .map(|error| SyntaxIssue::from_rich(error, 0))
            .collect());
    }
    ast.ok_or_else(Vec::new)
}

struct Level {
    resume: usize,
    statement_depth: usize,
    control_head: bool,
    else_if_chain: usize,
}

impl Level {
    fn new(resume: usize, statement_depth: usize, control_head: bool) -> Self {
        Self {
            resume,
            statement_depth,
            control_head,
            else_if_chain: 0,
        }
    }

    fn statement_start(&self) -> usize {
        self.statement_depth + self.else_if_chain
    }
}

/// Reports the first token nested deeper than [`MAX_NESTING_DEPTH`].
///
/// Brackets and operators each add a level. A statement starts at the level
/// just inside its enclosing bracket, and an operand right after another
/// operand starts a statement where a semicolon was left out. The body of an
/// `if`, `while` or `for` head and each `else if` branch nest one level deeper.
fn nesting_issue(tokens: &[Spanned<Token<'_>>]) -> Option<SyntaxIssue> {
    let mut root = Level::new(0, 0, false);
    let mut levels: Vec<Level> = Vec::new();
    let mut depth = 0;
    let mut after_operand = false;
    let mut previous: Option<&Token<'_>> = None;

    for (index, Spanned { node, span }) in tokens.iter().enumerate() {
        let next = tokens.get(index + 1).map(|token| &token.node);
        let level = levels.last_mut().unwrap_or(&mut root);
        match node {
            Token::BracketRoundOpen | Token::BracketSquareOpen | Token::BracketCurlyOpen => {
                let control_head = matches!(previous, Some(Token::If | Token::While | Token::For));
                levels.push(Level::new(depth, depth + 1, control_head));
                depth += 1;
                after_operand = false;
            }
            Token::BracketRoundClose | Token::BracketSquareClose | Token::BracketCurlyClose => {
                let closed = levels.pop();
                let resume = closed.as_ref().map_or(0, |closed| closed.resume);
                // A closed group can still be called or indexed.
                depth = match node {
                    Token::BracketCurlyClose => resume,
                    _ => resume + 1,
                };
                after_operand = !closed.is_some_and(|closed| closed.control_head);
            }
            Token::Semicolon | Token::Comma => {
                if next != Some(&Token::Else) {
                    level.else_if_chain = 0;
                }
                depth = level.statement_start();
                after_operand = false;
            }
            Token::Else => {
                if next == Some(&Token::If) {
                    level.else_if_chain += 1;
                }
                depth = level.statement_start();
                after_operand = false;
            }
            token if token.is_operand() => {
                if after_operand {
                    level.else_if_chain = 0;
                    depth = level.statement_start();
                }
                after_operand = true;
            }
            _ => {
                depth += 1;
                after_operand = false;
            }
        }
        previous = Some(node);
        if depth > MAX_NESTING_DEPTH {
            let reason = format!("Nesting exceeds the limit of {MAX_NESTING_DEPTH} levels");
            return Some(SyntaxIssue {
                message: format!("{reason} at '{node}'"),
                reason,
                range: span.into_range(),
            });
        }
    }
    None
}

pub fn parser<'code, I>()
-> impl Parser<'code, I, Vec<Spanned<Statement>>, TokenExtra<'code>>
where
    I: ValueInput<'code, Token = Token<'code>, Span = Span>,
{
    let mut expression: Recursive<Indirect<'code, 'code, I, Spanned<Expression>, TokenExtra<'code>>> =
        Recursive::declare();
    let mut statement: Recursive<Indirect<'code, 'code, I, Spanned<Statement>, TokenExtra<'code>>> =
        Recursive::declare();
    let mut pattern: Recursive<Indirect<'code, 'code, I, Pattern, TokenExtra<'code>>> =
        Recursive::declare();

    let comma = just(Token::Comma);
    let colon = just(Token::Colon);
    let ellipsis = just(Token::Ellipsis);
    let assign = just(Token::Assign);
    let bracket_round_open = just(Token::BracketRoundOpen);
    let bracket_round_close = just(Token::BracketRoundClose);
    let bracket_curly_open = just(Token::BracketCurlyOpen);
    let bracket_curly_close = just(Token::BracketCurlyClose);
    let bracket_square_open = just(Token::BracketSquareOpen);
    let bracket_square_close = just(Token::BracketSquareClose);

    let identifier = select! { Token::Identifier(name) => name.to_string() };
    let property_name = any().try_map(|token: Token<'code>, span| {
        token
            .property_name()
            .map(str::to_string)
            .ok_or_else(|| Rich::custom(span, format!("expected a property name, found '{token}'")))
    });
    let string_literal = select! { Token::Text(raw) => unescape(raw) };
    let from_keyword = select! { Token::Identifier("from") => () };
    let as_keyword = select! { Token::Identifier("as") => () };
    let of_keyword = select! { Token::Identifier("of") => () };

    // Patterns
    pattern.define({
        let default = assign.clone().ignore_then(expression.clone()).or_not();

        let object_property = property_name
            .clone()
            .then(colon.clone().ignore_then(pattern.clone()).or_not())
            .then(default.clone())
            .map(|((key, value), default)| PatternProperty {
                value: value.unwrap_or_else(|| Pattern::Identifier(key.clone())),
                key,
                default,
            });

        let object_pattern = object_property
            .separated_by(comma.clone())
            .allow_trailing()
            .collect::<Vec<_>>()
            .then(ellipsis.clone().ignore_then(identifier.clone()).or_not())
            .delimited_by(bracket_curly_open.clone(), bracket_curly_close.clone())
            .map(|(properties, rest)| Pattern::Object { properties, rest });

        let array_element = pattern
            .clone()
            .then(default)
            .map(|(pattern, default)| PatternElement { pattern, default });

        let array_pattern = array_element
            .separated_by(comma.clone())
            .allow_trailing()
            .collect::<Vec<_>>()
            .then(ellipsis.clone().ignore_then(pattern.clone()).or_not())
            .delimited_by(bracket_square_open.clone(), bracket_square_close.clone())
            .map(|(elements, rest)| Pattern::Array {
                elements,
                rest: rest.map(Box::new),
            });

        choice((
            identifier.clone().map(Pattern::Identifier),
            object_pattern,
            array_pattern,
        ))
    });

    let parameter = ellipsis
        .clone()
        .or_not()
        .then(pattern.clone())
        .then(assign.clone().ignore_then(expression.clone()).or_not())
        .map(|((rest, pattern), default)| Parameter {
            pattern,
            default,
            rest: rest.is_some(),
        });

    let parameters = parameter
        .separated_by(comma.clone())
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(bracket_round_open.clone(), bracket_round_close.clone());

    let block = statement
        .clone()
        .repeated()
        .collect::<Vec<_>>()
        .delimited_by(bracket_curly_open.clone(), bracket_curly_close.clone());

    let element = ellipsis
        .clone()
        .ignore_then(expression.clone())
        .map(Element::Spread)
        .or(expression.clone().map(Element::Expression));

    let arguments = element
        .clone()
        .separated_by(comma.clone())
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(bracket_round_open.clone(), bracket_round_close.clone());

    // Expressions
    expression.define({
        let literal = select! {
            Token::Number(number) => Expression::Number(number),
            Token::Text(raw) => Expression::Text(unescape(raw)),
            Token::True => Expression::Boolean(true),
            Token::False => Expression::Boolean(false),
            Token::Null => Expression::Null,
            Token::Undefined => Expression::Undefined,
            Token::This => Expression::This,
        };

        let template = select! { Token::Template(raw) => raw }
            .map_with(|raw: &str, extra| {
                let span: Span = extra.span();
                Expression::Template(split_template(raw, span.start + 1))
            });

        let function_expression = just(Token::Async)
            .or_not()
            .then_ignore(just(Token::Function))
            .then(identifier.clone().or_not())
            .then(parameters.clone())
            .then(block.clone())
            .map_with(|(((is_async, name), parameters), body), extra| {
                Expression::Function(Rc::new(FunctionDefinition {
                    name,
                    parameters,
                    body: FunctionBody::Block(body),
                    is_async: is_async.is_some(),
                    is_arrow: false,
                    span: extra.span(),
                }))
            });

        let arrow_parameters = identifier
            .clone()
            .map(|name| {
                vec![Parameter {
                    pattern: Pattern::Identifier(name),
                    default: None,
                    rest: false,
                }]
            })
            .or(parameters.clone());

        let arrow_body = block
            .clone()
            .map(FunctionBody::Block)
            .or(expression
                .clone()
                .map(|body| FunctionBody::Expression(Box::new(body))));

        let arrow_function = just(Token::Async)
            .or_not()
            .then(arrow_parameters)
            .then_ignore(just(Token::Arrow))
            .then(arrow_body)
            .map_with(|((is_async, parameters), body), extra| {
                Expression::Function(Rc::new(FunctionDefinition {
                    name: None,
                    parameters,
                    body,
                    is_async: is_async.is_some(),
                    is_arrow: true,
                    span: extra.span(),
                }))
            });

        let new_expression = just(Token::New)
            .ignore_then(
                identifier
                    .clone()
                    .separated_by(just(Token::Dot))
                    .at_least(1)
                    .collect::<Vec<_>>()
                    .map_with(|path, extra| {
                        let span: Span = extra.span();
                        let mut path = path.into_iter();
                        let root = Expression::Identifier(path.next().unwrap_or_default());
                        path.fold(spanned(root, span), |object, property| {
                            spanned(
                                Expression::Member {
                                    object: Box::new(object),
                                    property,
                                    optional: false,
                                },
                                span,
                            )
                        })
                    }),
            )
            .then(arguments.clone().or_not())
            .map(|(callee, arguments)| Expression::New {
                callee: Box::new(callee),
                arguments: arguments.unwrap_or_default(),
            });

        let array = element
            .clone()
            .separated_by(comma.clone())
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(bracket_square_open.clone(), bracket_square_close.clone())
            .map(Expression::Array);

        let object = {
            let number_key = select! { Token::Number(number) => number_key(number) };
            let property_key = property_name.clone().or(string_literal.clone()).or(number_key);

            let method = just(Token::Async)
                .or_not()
                .then(property_key.clone())
                .then(parameters.clone())
                .then(block.clone())
                .map_with(|(((is_async, key), parameters), body), extra| {
                    let span: Span = extra.span();
                    ObjectMember::Property {
                        value: spanned(
                            Expression::Function(Rc::new(FunctionDefinition {
                                name: Some(key.clone()),
                                parameters,
                                body: FunctionBody::Block(body),
                                is_async: is_async.is_some(),
                                is_arrow: false,
                                span,
                            })),
                            span,
                        ),
                        key,
                    }
                });

            let key_value = property_key
                .then_ignore(colon.clone())
                .then(expression.clone())
                .map(|(key, value)| ObjectMember::Property { key, value });

            let computed = expression
                .clone()
                .delimited_by(bracket_square_open.clone(), bracket_square_close.clone())
                .then_ignore(colon.clone())
                .then(expression.clone())
                .map(|(key, value)| ObjectMember::Computed { key, value });

            let spread = ellipsis
                .clone()
                .ignore_then(expression.clone())
                .map(ObjectMember::Spread);

            let shorthand = identifier.clone().map_with(|name, extra| ObjectMember::Property {
                value: spanned(Expression::Identifier(name.clone()), extra.span()),
                key: name,
            });

            choice((spread, method, key_value, computed, shorthand))
                .separated_by(comma.clone())
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(bracket_curly_open.clone(), bracket_curly_close.clone())
                .map(Expression::Object)
        };

        let expression_identifier = identifier.clone().map(Expression::Identifier);

        let nested = expression
            .clone()
            .delimited_by(bracket_round_open.clone(), bracket_round_close.clone());

        let atom = choice((
            arrow_function,
            function_expression,
            new_expression,
            literal,
            template,
            array,
            object,
            expression_identifier,
        ))
        .map_with(|expression, extra| spanned(expression, extra.span()))
        .or(nested);

        let postfix_operator = {
            let optional = just(Token::QuestionDot);
            choice((
                arguments.clone().map(|arguments| Postfix::Call {
                    arguments,
                    optional: false,
                }),
                just(Token::Dot)
                    .ignore_then(property_name.clone())
                    .map(|property| Postfix::Member {
                        property,
                        optional: false,
                    }),
                expression
                    .clone()
                    .delimited_by(bracket_square_open.clone(), bracket_square_close.clone())
                    .map(|index| Postfix::Index {
                        index,
                        optional: false,
                    }),
                optional
                    .clone()
                    .ignore_then(arguments.clone())
                    .map(|arguments| Postfix::Call {
                        arguments,
                        optional: true,
                    }),
                optional
                    .clone()
                    .ignore_then(
                        expression
                            .clone()
                            .delimited_by(bracket_square_open.clone(), bracket_square_close.clone()),
                    )
                    .map(|index| Postfix::Index {
                        index,
                        optional: true,
                    }),
                optional
                    .ignore_then(property_name.clone())
                    .map(|property| Postfix::Member {
                        property,
                        optional: true,
                    }),
            ))
        };

        let update_operator = select! {
            Token::Increment => UpdateOperator::Increment,
            Token::Decrement => UpdateOperator::Decrement,
        };

        let conditional_operator = just(Token::Question)
            .ignore_then(expression.clone())
            .then_ignore(colon.clone());

        atom.pratt((
            postfix(30, postfix_operator, |object, operator, extra| {
                let object = Box::new(object);
                let node = match operator {
                    Postfix::Call {
                        arguments,
                        optional,
                    } => Expression::Call {
                        callee: object,
                        arguments,
                        optional,
                    },
                    Postfix::Member { property, optional } => Expression::Member {
                        object,
                        property,
                        optional,
                    },
                    Postfix::Index { index, optional } => Expression::Index {
                        object,
                        index: Box::new(index),
                        optional,
                    },
                };
                spanned(node, extra.span())
            }),
            postfix(28, update_operator, |target, operator, extra| {
                spanned(
                    Expression::Update {
                        operator,
                        prefix: false,
                        target: Box::new(target),
                    },
                    extra.span(),
                )
            }),
            prefix(
                26,
                select! {
                    Token::Not => UnaryOperator::Not,
                    Token::Minus => UnaryOperator::Negate,
                    Token::Plus => UnaryOperator::Plus,
                    Token::Typeof => UnaryOperator::Typeof,
                },
                |operator, operand, extra| {
                    spanned(
                        Expression::Unary {
                            operator,
                            operand: Box::new(operand),
                        },
                        extra.span(),
                    )
                },
            ),
            prefix(26, just(Token::Await), |_, operand, extra| {
                spanned(Expression::Await(Box::new(operand)), extra.span())
            }),
            prefix(26, update_operator, |operator, target, extra| {
                spanned(
                    Expression::Update {
                        operator,
                        prefix: true,
                        target: Box::new(target),
                    },
                    extra.span(),
                )
            }),
            infix(right(24), just(Token::Power), |left, _, right, extra| {
                binary(BinaryOperator::Power, left, right, extra.span())
            }),
            infix(
                left(22),
                select! {
                    Token::Asterisk => BinaryOperator::Multiply,
                    Token::Slash => BinaryOperator::Divide,
                    Token::Percent => BinaryOperator::Remainder,
                },
                |left, operator, right, extra| binary(operator, left, right, extra.span()),
            ),
            infix(
                left(20),
                select! {
                    Token::Plus => BinaryOperator::Add,
                    Token::Minus => BinaryOperator::Subtract,
                },
                |left, operator, right, extra| binary(operator, left, right, extra.span()),
            ),
            infix(
                left(18),
                select! {
                    Token::Less => BinaryOperator::Less,
                    Token::LessOrEqual => BinaryOperator::LessOrEqual,
                    Token::Greater => BinaryOperator::Greater,
                    Token::GreaterOrEqual => BinaryOperator::GreaterOrEqual,
                    Token::In => BinaryOperator::In,
                },
                |left, operator, right, extra| binary(operator, left, right, extra.span()),
            ),
            infix(
                left(16),
                select! {
                    Token::Equal => BinaryOperator::Equal,
                    Token::NotEqual => BinaryOperator::NotEqual,
                    Token::StrictEqual => BinaryOperator::StrictEqual,
                    Token::StrictNotEqual => BinaryOperator::StrictNotEqual,
                },
                |left, operator, right, extra| binary(operator, left, right, extra.span()),
            ),
            infix(left(12), just(Token::And), |left, _, right, extra| {
                logical(LogicalOperator::And, left, right, extra.span())
            }),
            infix(
                left(10),
                select! {
                    Token::Or => LogicalOperator::Or,
                    Token::Nullish => LogicalOperator::Nullish,
                },
                |left, operator, right, extra| logical(operator, left, right, extra.span()),
            ),
            infix(
                right(6),
                conditional_operator,
                |test, consequent, alternate, extra| {
                    spanned(
                        Expression::Conditional {
                            test: Box::new(test),
                            consequent: Box::new(consequent),
                            alternate: Box::new(alternate),
                        },
                        extra.span(),
                    )
                },
            ),
            infix(
                right(4),
                select! {
                    Token::Assign => AssignOperator::Assign,
                    Token::PlusAssign => AssignOperator::Add,
                    Token::MinusAssign => AssignOperator::Subtract,
                    Token::AsteriskAssign => AssignOperator::Multiply,
                    Token::SlashAssign => AssignOperator::Divide,
                    Token::PercentAssign => AssignOperator::Remainder,
                    Token::NullishAssign => AssignOperator::Nullish,
                },
                |target, operator, value, extra| {
                    spanned(
                        Expression::Assign {
                            operator,
                            target: Box::new(target),
                            value: Box::new(value),
                        },
                        extra.span(),
                    )
                },
            ),
        ))
    });

    // Statements
    statement.define({
        let optional_semicolon = just(Token::Semicolon).or_not();

        let declaration_kind = select! {
            Token::Let => DeclarationKind::Let,
            Token::Const => DeclarationKind::Const,
            Token::Var => DeclarationKind::Var,
        };

        let declarator = pattern
            .clone()
            .map_with(|pattern, extra| spanned(pattern, extra.span()))
            .then(assign.clone().ignore_then(expression.clone()).or_not())
            .map(|(pattern, init)| Declarator { pattern, init });

        let declaration = declaration_kind
            .clone()
            .then(
                declarator
                    .separated_by(comma.clone())
                    .at_least(1)
                    .collect::<Vec<_>>(),
            )
            .map(|(kind, declarators)| Declaration { kind, declarators });

        let function_declaration = just(Token::Async)
            .or_not()
            .then_ignore(just(Token::Function))
            .then(identifier.clone())
            .then(parameters.clone())
            .then(block.clone())
            .map_with(|(((is_async, name), parameters), body), extra| {
                Rc::new(FunctionDefinition {
                    name: Some(name),
                    parameters,
                    body: FunctionBody::Block(body),
                    is_async: is_async.is_some(),
                    is_arrow: false,
                    span: extra.span(),
                })
            });

        let parenthesized = expression
            .clone()
            .delimited_by(bracket_round_open.clone(), bracket_round_close.clone());

        let return_statement = just(Token::Return)
            .ignore_then(expression.clone().or_not())
            .map(Statement::Return);

        let if_statement = just(Token::If)
            .ignore_then(parenthesized.clone())
            .then(statement.clone())
            .then(just(Token::Else).ignore_then(statement.clone()).or_not())
            .map(|((test, consequent), alternate)| Statement::If {
                test,
                consequent: Box::new(consequent),
                alternate: alternate.map(Box::new),
            });

        let while_statement = just(Token::While)
            .ignore_then(parenthesized)
            .then(statement.clone())
            .map(|(test, body)| Statement::While {
                test,
                body: Box::new(body),
            });

        let for_of_statement = just(Token::For)
            .ignore_then(
                declaration_kind
                    .clone()
                    .then(pattern.clone())
                    .then_ignore(of_keyword)
                    .then(expression.clone())
                    .delimited_by(bracket_round_open.clone(), bracket_round_close.clone()),
            )
            .then(statement.clone())
            .map(|(((kind, pattern), iterable), body)| Statement::ForOf {
                kind,
                pattern,
                iterable,
                body: Box::new(body),
            });

        let for_in_statement = just(Token::For)
            .ignore_then(
                declaration_kind
                    .clone()
                    .then(pattern.clone())
                    .then_ignore(just(Token::In))
                    .then(expression.clone())
                    .delimited_by(bracket_round_open.clone(), bracket_round_close.clone()),
            )
            .then(statement.clone())
            .map(|(((kind, pattern), object), body)| Statement::ForIn {
                kind,
                pattern,
                object,
                body: Box::new(body),
            });

        let for_init = declaration
            .clone()
            .map(Statement::Declaration)
            .or(expression.clone().map(Statement::Expression))
            .map_with(|statement, extra| spanned(statement, extra.span()));

        let for_statement = just(Token::For)
            .ignore_then(
                for_init
                    .or_not()
                    .then_ignore(just(Token::Semicolon))
                    .then(expression.clone().or_not())
                    .then_ignore(just(Token::Semicolon))
                    .then(expression.clone().or_not())
                    .delimited_by(bracket_round_open.clone(), bracket_round_close.clone()),
            )
            .then(statement.clone())
            .map(|(((init, test), update), body)| Statement::For {
                init: init.map(Box::new),
                test,
                update,
                body: Box::new(body),
            });

        let throw_statement = just(Token::Throw)
            .ignore_then(expression.clone())
            .map(Statement::Throw);

        let catch_clause = just(Token::Catch)
            .ignore_then(
                pattern
                    .clone()
                    .delimited_by(bracket_round_open.clone(), bracket_round_close.clone())
                    .or_not(),
            )
            .then(block.clone())
            .map(|(parameter, body)| CatchClause { parameter, body });

        let try_statement = just(Token::Try)
            .ignore_then(block.clone())
            .then(catch_clause.or_not())
            .then(just(Token::Finally).ignore_then(block.clone()).or_not())
            .map(|((block, handler), finalizer)| Statement::Try {
                block,
                handler,
                finalizer,
            });

        let import_statement = {
            let import_specifier = property_name
                .clone()
                .then(as_keyword.clone().ignore_then(identifier.clone()).or_not())
                .map(|(imported, local)| ImportSpecifier {
                    local: local.unwrap_or_else(|| imported.clone()),
                    imported,
                });

            let named_imports = import_specifier
                .separated_by(comma.clone())
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(bracket_curly_open.clone(), bracket_curly_close.clone())
                .map(ImportBindings::Named);

            let namespace_import = just(Token::Asterisk)
                .ignore_then(as_keyword.clone())
                .ignore_then(identifier.clone())
                .map(ImportBindings::Namespace);

            let bindings = named_imports.or(namespace_import);

            let import_clause = identifier
                .clone()
                .then(comma.clone().ignore_then(bindings.clone()).or_not())
                .map(|(default, bindings)| (Some(default), bindings))
                .or(bindings.map(|bindings| (None, Some(bindings))));

            let with_clause = import_clause
                .then_ignore(from_keyword.clone())
                .then(string_literal.clone())
                .map(|((default, bindings), source)| {
                    let mut declaration = ImportDeclaration {
                        source,
                        default,
                        namespace: None,
                        named: Vec::new(),
                    };
                    match bindings {
                        Some(ImportBindings::Named(named)) => declaration.named = named,
                        Some(ImportBindings::Namespace(namespace)) => {
                            declaration.namespace = Some(namespace)
                        }
                        None => {}
                    }
                    declaration
                });

            let side_effect_only = string_literal.clone().map(|source| ImportDeclaration {
                source,
                default: None,
                namespace: None,
                named: Vec::new(),
            });

            just(Token::Import)
                .ignore_then(with_clause.or(side_effect_only))
                .map(Statement::Import)
        };

        let export_statement = {
            let exported_declaration = declaration
                .clone()
                .map(Statement::Declaration)
                .or(function_declaration.clone().map(Statement::Function))
                .map_with(|statement, extra| {
                    ExportDeclaration::Declaration(Box::new(spanned(statement, extra.span())))
                });

            let export_default = just(Token::Default)
                .ignore_then(expression.clone())
                .map(ExportDeclaration::Default);

            let export_all = just(Token::Asterisk)
                .ignore_then(as_keyword.clone().ignore_then(property_name.clone()).or_not())
                .then_ignore(from_keyword.clone())
                .then(string_literal.clone())
                .map(|(alias, source)| ExportDeclaration::All { source, alias });

            let export_specifier = property_name
                .clone()
                .then(as_keyword.ignore_then(property_name.clone()).or_not())
                .map(|(local, exported)| ExportSpecifier {
                    exported: exported.unwrap_or_else(|| local.clone()),
                    local,
                });

            let export_named = export_specifier
                .separated_by(comma.clone())
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(bracket_curly_open.clone(), bracket_curly_close.clone())
                .then(from_keyword.ignore_then(string_literal).or_not())
                .map(|(specifiers, source)| ExportDeclaration::Named { specifiers, source });

            just(Token::Export)
                .ignore_then(choice((
                    exported_declaration,
                    export_default,
                    export_all,
                    export_named,
                )))
                .map(Statement::Export)
        };

        let block_statement = block.clone().map(Statement::Block);
        let empty_statement = just(Token::Semicolon).to(Statement::Empty);

        choice((
            block_statement,
            empty_statement,
            declaration.map(Statement::Declaration),
            function_declaration.map(Statement::Function),
            return_statement,
            if_statement,
            for_of_statement,
            for_in_statement,
            for_statement,
            while_statement,
            just(Token::Break).to(Statement::Break),
            just(Token::Continue).to(Statement::Continue),
            throw_statement,
            try_statement,
            import_statement,
            export_statement,
            expression.clone().map(Statement::Expression),
        ))
        .then_ignore(optional_semicolon)
        .map_with(|statement, extra| spanned(statement, extra.span()))
    });

    statement.repeated().collect()
}

fn binary(
    operator: BinaryOperator,
    left: Spanned<Expression>,
    right: Spanned<Expression>,
    span: Span,
) -> Spanned<Expression> {
    spanned(
        Expression::Binary {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

fn logical(
    operator: LogicalOperator,
    left: Spanned<Expression>,
    right: Spanned<Expression>,
    span: Span,
) -> Spanned<Expression> {
    spanned(
        Expression::Logical {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

fn number_key(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        number.to_string()
    }
}

/// Resolves the escape sequences of a raw string literal.
pub fn unescape(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut characters = raw.chars();
    while let Some(character) = characters.next() {
        if character != '\\' {
            text.push(character);
            continue;
        }
        match characters.next() {
            Some('n') => text.push('\n'),
            Some('t') => text.push('\t'),
            Some('r') => text.push('\r'),
            Some('0') => text.push('\0'),
            Some('b') => text.push('\u{8}'),
            Some('f') => text.push('\u{c}'),
            Some('v') => text.push('\u{b}'),
            Some('u') => {
                let hex: String = characters.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => text.push(decoded),
                    None => {
                        text.push_str("\\u");
                        text.push_str(&hex);
                    }
                }
            }
            // A backslash before a newline continues the line.
            Some('\n') => {}
            Some(other) => text.push(other),
            None => text.push('\\'),
        }
    }
    text
}

/// Splits the raw body of a template literal into text and `${...}` parts.
/// `offset` is the byte offset of the body inside the parsed text.
fn split_template(raw: &str, offset: usize) -> Vec<TemplatePart> {
    let mut parts = Vec::new();
    let mut text_start = 0;
    let bytes = raw.as_bytes();
    let mut index = 0;

    while index < bytes.len() {
        match bytes[index] {
            b'\\' => index += 2,
            b'$' if bytes.get(index + 1) == Some(&b'{') => {
                if index > text_start {
                    parts.push(TemplatePart::Text(unescape(&raw[text_start..index])));
                }
                let expression_start = index + 2;
                let mut depth = 0usize;
                let mut quote: Option<u8> = None;
                let mut cursor = expression_start;
                while cursor < bytes.len() {
                    let byte = bytes[cursor];
                    match quote {
                        Some(open) if byte == open => quote = None,
                        Some(_) if byte == b'\\' => cursor += 1,
                        Some(_) => {}
                        None => match byte {
                            b'"' | b'\'' => quote = Some(byte),
                            b'{' => depth += 1,
                            b'}' if depth == 0 => break,
                            b'}' => depth -= 1,
                            _ => {}
                        },
                    }
                    cursor += 1;
                }
                let end = cursor.min(bytes.len());
                parts.push(TemplatePart::Expression(TemplateExpression::new(
                    &raw[expression_start..end],
                    offset + expression_start,
                )));
                index = end + 1;
                text_start = index;
            }
            _ => index += 1,
        }
    }
    if text_start < raw.len() {
        parts.push(TemplatePart::Text(unescape(&raw[text_start..])));
    }
    parts
}

enum Postfix {
    Call {
        arguments: Vec<Element>,
        optional: bool,
    },
    Member {
        property: String,
        optional: bool,
    },
    Index {
        index: Spanned<Expression>,
        optional: bool,
    },
}

enum ImportBindings {
    Named(Vec<ImportSpecifier>),
    Namespace(String),
}

#[derive(Debug, Clone)]
pub enum Statement {
    Declaration(Declaration),
    Function(Rc<FunctionDefinition>),
    Return(Option<Spanned<Expression>>),
    If {
        test: Spanned<Expression>,
        consequent: Box<Spanned<Statement>>,
        alternate: Option<Box<Spanned<Statement>>>,
    },
    While {
        test: Spanned<Expression>,
        body: Box<Spanned<Statement>>,
    },
    For {
        init: Option<Box<Spanned<Statement>>>,
        test: Option<Spanned<Expression>>,
        update: Option<Spanned<Expression>>,
        body: Box<Spanned<Statement>>,
    },
    ForOf {
        kind: DeclarationKind,
        pattern: Pattern,
        iterable: Spanned<Expression>,
        body: Box<Spanned<Statement>>,
    },
    ForIn {
        kind: DeclarationKind,
        pattern: Pattern,
        object: Spanned<Expression>,
        body: Box<Spanned<Statement>>,
    },
    Break,
    Continue,
    Throw(Spanned<Expression>),
    Try {
        block: Vec<Spanned<Statement>>,
        handler: Option<CatchClause>,
        finalizer: Option<Vec<Spanned<Statement>>>,
    },
    Block(Vec<Spanned<Statement>>),
    Expression(Spanned<Expression>),
    Import(ImportDeclaration),
    Export(ExportDeclaration),
    Empty,
}

impl Statement {
    /// Names this statement binds in the scope it appears in.
    pub fn declared_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        match self {
            Self::Declaration(declaration) => {
                for declarator in &declaration.declarators {
                    declarator.pattern.node.collect_names(&mut names);
                }
            }
            Self::Function(function) => names.extend(function.name.clone()),
            Self::Import(import) => {
                names.extend(import.default.clone());
                names.extend(import.namespace.clone());
                names.extend(import.named.iter().map(|specifier| specifier.local.clone()));
            }
            Self::Export(ExportDeclaration::Declaration(inner)) => {
                names.extend(inner.node.declared_names())
            }
            _ => {}
        }
        names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    Let,
    Const,
    Var,
}

#[derive(Debug, Clone)]
pub struct Declaration {
    pub kind: DeclarationKind,
    pub declarators: Vec<Declarator>,
}

#[derive(Debug, Clone)]
pub struct Declarator {
    pub pattern: Spanned<Pattern>,
    pub init: Option<Spanned<Expression>>,
}

#[derive(Debug, Clone)]
pub struct CatchClause {
    pub parameter: Option<Pattern>,
    pub body: Vec<Spanned<Statement>>,
}

#[derive(Debug, Clone)]
pub struct ImportDeclaration {
    pub source: String,
    pub default: Option<String>,
    pub namespace: Option<String>,
    pub named: Vec<ImportSpecifier>,
}

#[derive(Debug, Clone)]
pub struct ImportSpecifier {
    pub imported: String,
    pub local: String,
}

#[derive(Debug, Clone)]
pub enum ExportDeclaration {
    /// `export const ...` or `export function ...`
    Declaration(Box<Spanned<Statement>>),
    Named {
        specifiers: Vec<ExportSpecifier>,
        source: Option<String>,
    },
    Default(Spanned<Expression>),
    All {
        source: String,
        alias: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct ExportSpecifier {
    pub local: String,
    pub exported: String,
}

#[derive(Debug, Clone)]
pub enum Pattern {
    Identifier(String),
    Object {
        properties: Vec<PatternProperty>,
        rest: Option<String>,
    },
    Array {
        elements: Vec<PatternElement>,
        rest: Option<Box<Pattern>>,
    },
}

impl Pattern {
    pub fn collect_names(&self, names: &mut Vec<String>) {
        match self {
            Self::Identifier(name) => names.push(name.clone()),
            Self::Object { properties, rest } => {
                for property in properties {
                    property.value.collect_names(names);
                }
                names.extend(rest.clone());
            }
            Self::Array { elements, rest } => {
                for element in elements {
                    element.pattern.collect_names(names);
                }
                if let Some(rest) = rest {
                    rest.collect_names(names);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PatternProperty {
    pub key: String,
    pub value: Pattern,
    pub default: Option<Spanned<Expression>>,
}

#[derive(Debug, Clone)]
pub struct PatternElement {
    pub pattern: Pattern,
    pub default: Option<Spanned<Expression>>,
}

#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    pub name: Option<String>,
    pub parameters: Vec<Parameter>,
    pub body: FunctionBody,
    pub is_async: bool,
    pub is_arrow: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub pattern: Pattern,
    pub default: Option<Spanned<Expression>>,
    pub rest: bool,
}

#[derive(Debug, Clone)]
pub enum FunctionBody {
    Block(Vec<Spanned<Statement>>),
    Expression(Box<Spanned<Expression>>),
}

#[derive(Debug, Clone)]
pub enum Expression {
    Number(f64),
    Text(String),
    Template(Vec<TemplatePart>),
    Boolean(bool),
    Null,
    Undefined,
    This,
    Identifier(String),
    Array(Vec<Element>),
    Object(Vec<ObjectMember>),
    Function(Rc<FunctionDefinition>),
    Unary {
        operator: UnaryOperator,
        operand: Box<Spanned<Expression>>,
    },
    Update {
        operator: UpdateOperator,
        prefix: bool,
        target: Box<Spanned<Expression>>,
    },
    Binary {
        operator: BinaryOperator,
        left: Box<Spanned<Expression>>,
        right: Box<Spanned<Expression>>,
    },
    Logical {
        operator: LogicalOperator,
        left: Box<Spanned<Expression>>,
        right: Box<Spanned<Expression>>,
    },
    Conditional {
        test: Box<Spanned<Expression>>,
        consequent: Box<Spanned<Expression>>,
        alternate: Box<Spanned<Expression>>,
    },
    Assign {
        operator: AssignOperator,
        target: Box<Spanned<Expression>>,
        value: Box<Spanned<Expression>>,
    },
    Call {
        callee: Box<Spanned<Expression>>,
        arguments: Vec<Element>,
        optional: bool,
    },
    Member {
        object: Box<Spanned<Expression>>,
        property: String,
        optional: bool,
    },
    Index {
        object: Box<Spanned<Expression>>,
        index: Box<Spanned<Expression>>,
        optional: bool,
    },
    New {
        callee: Box<Spanned<Expression>>,
        arguments: Vec<Element>,
    },
    Await(Box<Spanned<Expression>>),
}

#[derive(Debug, Clone)]
pub enum Element {
    Expression(Spanned<Expression>),
    Spread(Spanned<Expression>),
}

#[derive(Debug, Clone)]
pub enum ObjectMember {
    Property {
        key: String,
        value: Spanned<Expression>,
    },
    Computed {
        key: Spanned<Expression>,
        value: Spanned<Expression>,
    },
    Spread(Spanned<Expression>),
}

#[derive(Debug, Clone)]
pub enum TemplatePart {
    Text(String),
    Expression(TemplateExpression),
}

/// An interpolated `${...}` expression, parsed on first evaluation.
#[derive(Debug, Clone)]
pub struct TemplateExpression {
    pub source: String,
    pub offset: usize,
    parsed: OnceCell<Result<Rc<Spanned<Expression>>, String>>,
}

impl TemplateExpression {
    fn new(source: &str, offset: usize) -> Self {
        Self {
            source: source.to_string(),
            offset,
            parsed: OnceCell::new(),
        }
    }

    pub fn expression(&self) -> Result<Rc<Spanned<Expression>>, String> {
        self.parsed
            .get_or_init(|| {
                let mut statements = parse_program_at(&self.source, self.offset).map_err(|issues| {
                    issues
                        .first()
                        .map(|issue| issue.message.clone())
                        .unwrap_or_else(|| "invalid template expression".to_string())
                })?;
                match statements.pop() {
                    Some(Spanned {
                        node: Statement::Expression(expression),
                        ..
                    }) if statements.is_empty() => Ok(Rc::new(expression)),
                    _ => Err(format!("'{}' is not an expression", self.source)),
                }
            })
            .clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Negate,
    Plus,
    Typeof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOperator {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Power,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOperator {
    Assign,
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Nullish,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_single(code: &str) -> Statement {
        let mut statements = parse_program(code).unwrap();
        assert_eq!(statements.len(), 1, "expected one statement in {code:?}");
        statements.remove(0).node
    }

    fn parse_expression(code: &str) -> Expression {
        match parse_single(code) {
            Statement::Expression(expression) => expression.node,
            other => panic!("Expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn test_precedence() {
        let expression = parse_expression("1 + 2 * 3");
        if let Expression::Binary {
            operator, right, ..
        } = expression
        {
            assert_eq!(operator, BinaryOperator::Add);
            assert!(matches!(
                right.node,
                Expression::Binary {
                    operator: BinaryOperator::Multiply,
                    ..
                }
            ));
        } else {
            panic!("Expected Binary, got {expression:?}");
        }
    }

    #[test]
    fn test_nesting_limit() {
        for code in [
            format!("{}1{}", "[".repeat(20_000), "]".repeat(20_000)),
            format!("{}1{}", "(".repeat(MAX_NESTING_DEPTH + 1), ")".repeat(MAX_NESTING_DEPTH + 1)),
            format!("1{}", " + 1".repeat(50_000)),
            format!("{}x", "!".repeat(50_000)),
            format!("{}x;", "if (a) ".repeat(50_000)),
            format!("if (a) x;{}", " else if (a) x;".repeat(50_000)),
            format!("if (a) {{}}{}", " else if (a) {{}}".repeat(50_000)),
        ] {
            let issues = parse_program(&code).unwrap_err();
            assert_eq!(issues.len(), 1);
            assert!(issues[0].message.starts_with("Nesting exceeds the limit of 256 levels"), "{}", issues[0].message);
        }

        let nested = format!("{}1{}", "(".repeat(20), ")".repeat(20));
        assert!(parse_program(&nested).is_ok());
    }

    #[test]
    fn test_nesting_resets_between_statements() {
        let with_semicolons = "x = x + 1;\n".repeat(2_000);
        assert_eq!(parse_program(&with_semicolons).unwrap().len(), 2_000);
        let without_semicolons = "x = x + 1\n".repeat(2_000);
        assert_eq!(parse_program(&without_semicolons).unwrap().len(), 2_000);
        let calls = "f(a, [b, c], { d: e.g });\n".repeat(2_000);
        assert_eq!(parse_program(&calls).unwrap().len(), 2_000);
        let blocks = "if (x) { y(); } else { z(); }\nfunction f() { return 1 }\n".repeat(500);
        assert_eq!(parse_program(&blocks).unwrap().len(), 1_000);
        let branches = "if (a) { b(); } else if (c) { d(); }\nif (a) b(); else if (c) d();\n".repeat(500);
        assert_eq!(parse_program(&branches).unwrap().len(), 1_000);
    }

    #[test]
    fn test_member_call_chain() {
        let expression = parse_expression("a.b(1)[0]?.c");
        assert!(matches!(
            expression,
            Expression::Member { optional: true, .. }
        ));
    }

    #[test]
    fn test_arrow_functions() {
        let expression = parse_expression("(a, b = 2) => a + b");
        if let Expression::Function(function) = expression {
            assert!(function.is_arrow);
            assert_eq!(function.parameters.len(), 2);
            assert!(function.parameters[1].default.is_some());
            assert!(matches!(function.body, FunctionBody::Expression(_)));
        } else {
            panic!("Expected Function, got {expression:?}");
        }
        assert!(matches!(
            parse_expression("async x => { return x }"),
            Expression::Function(_)
        ));
    }

    #[test]
    fn test_conditional_and_assignment() {
        let expression = parse_expression("x = a ? b : c");
        if let Expression::Assign { value, .. } = expression {
            assert!(matches!(value.node, Expression::Conditional { .. }));
        } else {
            panic!("Expected Assign, got {expression:?}");
        }
    }

    #[test]
    fn test_object_literal_members() {
        let expression = parse_expression("({ a: 1, 'b c': 2, d, ...e, f() { return 1 }, [g]: 3 })");
        if let Expression::Object(members) = expression {
            assert_eq!(members.len(), 6);
            assert!(matches!(&members[1], ObjectMember::Property { key, .. } if key == "b c"));
            assert!(matches!(members[3], ObjectMember::Spread(_)));
            assert!(matches!(members[5], ObjectMember::Computed { .. }));
        } else {
            panic!("Expected Object, got {expression:?}");
        }
    }

    #[test]
    fn test_declarations_with_destructuring() {
        let statement = parse_single("const { a, b: [c, ...d], e = 1 } = value;");
        assert_eq!(statement.declared_names(), vec!["a", "c", "d", "e"]);
    }

    #[test]
    fn test_import_forms() {
        if let Statement::Import(import) = parse_single("import def, { a, b as c } from 'm'") {
            assert_eq!(import.source, "m");
            assert_eq!(import.default.as_deref(), Some("def"));
            assert_eq!(import.named.len(), 2);
            assert_eq!(import.named[1].imported, "b");
            assert_eq!(import.named[1].local, "c");
        } else {
            panic!("Expected Import");
        }
        if let Statement::Import(import) = parse_single("import * as ns from \"m\";") {
            assert_eq!(import.namespace.as_deref(), Some("ns"));
        } else {
            panic!("Expected Import");
        }
        assert!(matches!(parse_single("import 'side-effect'"), Statement::Import(_)));
    }

    #[test]
    fn test_export_forms() {
        assert!(matches!(
            parse_single("export const a = 1, b = 2;"),
            Statement::Export(ExportDeclaration::Declaration(_))
        ));
        assert!(matches!(
            parse_single("export async function f() {}"),
            Statement::Export(ExportDeclaration::Declaration(_))
        ));
        assert!(matches!(
            parse_single("export { a, b as default } from 'm'"),
            Statement::Export(ExportDeclaration::Named { source: Some(_), .. })
        ));
        assert!(matches!(
            parse_single("export default 42"),
            Statement::Export(ExportDeclaration::Default(_))
        ));
        assert!(matches!(
            parse_single("export * as ns from 'm'"),
            Statement::Export(ExportDeclaration::All { alias: Some(_), .. })
        ));
    }

    #[test]
    fn test_control_flow_statements() {
        let code = "
            for (let i = 0; i < 3; i++) { continue }
            for (const x of xs) {}
            for (const k in obj) {}
            while (false) break;
            try { throw new Error('x') } catch (e) {} finally {}
            if (a) b(); else { c() }
        ";
        assert_eq!(parse_program(code).unwrap().len(), 6);
    }

    #[test]
    fn test_optional_semicolons_and_spans() {
        let code = "let a = 1\nlet b = 2;\na + b;";
        let statements = parse_program(code).unwrap();
        assert_eq!(statements.len(), 3);
        let last = &statements[2];
        assert_eq!(&code[last.span.into_range()], "a + b;");
    }

    #[test]
    fn test_template_literal() {
        let expression = parse_expression("`a ${b + 1} c`");
        if let Expression::Template(parts) = expression {
            assert_eq!(parts.len(), 3);
            if let TemplatePart::Expression(inner) = &parts[1] {
                assert_eq!(inner.source, "b + 1");
                assert_eq!(inner.offset, 5);
                assert!(inner.expression().is_ok());
            } else {
                panic!("Expected interpolation");
            }
        } else {
            panic!("Expected Template, got {expression:?}");
        }
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r"a\nb\tA\\"), "a\nb\tA\\");
    }

    #[test]
    fn test_syntax_issue_range() {
        let issues = parse_program("let = 1").unwrap_err();
        assert!(!issues.is_empty());
        assert!(issues[0].range.start <= 4);
    }
}
