use error::GatewayError;

/// A Result is an alias of [std::result::Result](std::result::Result) with its error variant
/// pre-populated with a `Box<dyn GatewayError>`. This allows for shorter
/// notation throughout the codebase.
///
/// For example, instead of writing...
///
/// ```
/// use error::GatewayError;
///
/// fn greet() -> Result<&'static str, Box<dyn GatewayError>> {
///     Ok("Hello, compute!")
/// }
/// ```
///
/// ...you can simply say...
///
/// ```
/// use error::GatewayError;
/// use result::Result;
///
/// fn greet() -> Result<&'static str> {
///     Ok("Hello, compute!")
/// }
/// ```
///
/// It also helps in easily identifying if any functions are returning errors
/// BEFORE converting them into project native [GatewayError](error::GatewayError)s.
pub type Result<T> = std::result::Result<T, Box<dyn GatewayError>>;
