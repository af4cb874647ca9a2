/* The error type threaded through the link
 *
 * Anything that goes wrong after the command line has been parsed travels
 * back to main() as a LinkError: a message, an optional address of the
 * offending site in the output image, and an optional cause. There is
 * exactly one catch site, the driver, which removes any partial output and
 * prints the chain.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::fmt;

pub type Result<T> = std::result::Result<T, LinkError>;

#[derive(Debug)]
pub struct LinkError
{
    address: Option<u64>,
    msg: String,
    nested: Option<Box<LinkError>>,
}

impl LinkError
{
    pub fn msg<S: Into<String>>(msg: S) -> LinkError
    {
        LinkError { address: None, msg: msg.into(), nested: None }
    }

    /* errors raised while patching the image carry the site address */
    pub fn at<S: Into<String>>(address: u64, msg: S) -> LinkError
    {
        LinkError { address: Some(address), msg: msg.into(), nested: None }
    }

    pub fn because<S: Into<String>>(msg: S, cause: LinkError) -> LinkError
    {
        LinkError { address: None, msg: msg.into(), nested: Some(Box::new(cause)) }
    }
}

impl fmt::Display for LinkError
{
    /* print the cause chain innermost first, one line per link */
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        if let Some(nested) = &self.nested
        {
            writeln!(f, "{}", nested)?;
        }
        if let Some(address) = self.address
        {
            write!(f, "[0x{:016X}] ", address)?;
        }
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for LinkError
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)>
    {
        match &self.nested
        {
            Some(nested) => Some(nested.as_ref()),
            None => None,
        }
    }
}
