/* Parse the configuration file format
 *
 * Linker settings live in an optional toml file selected with -T. Only
 * output defaults are configurable; anything given on the command line
 * wins over the file.
 *
 * [output]
 * runtime = "ulm"        # interpreter named by the output's shebang line
 * text_base = 0x1000     # load address of the text segment
 * fill = 0xFD            # byte used to pad alignment gaps
 * strip = false          # emit the stripped round-trip form
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use serde_derive::Deserialize;

#[derive(Clone)]
#[derive(Deserialize)]
pub struct Config
{
    output: Output,
}

impl Config
{
    pub fn get_output(&self) -> &Output { &self.output }
}

#[derive(Clone)]
#[derive(Deserialize)]
pub struct Output
{
    runtime: Option<String>,
    text_base: Option<u64>,
    fill: Option<u8>,
    strip: Option<bool>,
}

impl Output
{
    pub fn get_runtime(&self) -> String
    {
        match &self.runtime
        {
            Some(runtime) => runtime.clone(),
            None => String::from("ulm"),
        }
    }

    pub fn get_text_base(&self) -> u64 { self.text_base.unwrap_or(0) }
    pub fn get_fill(&self) -> u8 { self.fill.unwrap_or(0xFD) }
    pub fn get_strip(&self) -> bool { self.strip.unwrap_or(false) }
}

/* load the given file into memory and parse it, returning a config structure */
pub fn parse_config(filename: &str) -> Config
{
    let config_contents = match std::fs::read_to_string(filename)
    {
        Ok(contents) => contents,
        Err(reason) => crate::fatal_msg!("Can't read configuration file {}: {}", filename, reason),
    };

    match toml::from_str(config_contents.as_str())
    {
        Ok(config) => config,
        Err(reason) => crate::fatal_msg!("Can't parse configuration file {}: {}", filename, reason),
    }
}

/* generate a basic, default configuration. absent a configuration file,
   we'll use what's below. if a config file is specified, these defaults
   are discarded */
pub fn default_config() -> Config
{
    Config
    {
        output: Output
        {
            runtime: None,
            text_base: None,
            fill: None,
            strip: None,
        },
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn defaults()
    {
        let config = default_config();
        assert_eq!(config.get_output().get_runtime(), "ulm");
        assert_eq!(config.get_output().get_text_base(), 0);
        assert_eq!(config.get_output().get_fill(), 0xFD);
        assert!(!config.get_output().get_strip());
    }

    #[test]
    fn toml_settings()
    {
        let text = "[output]\nruntime = \"ulm-dev\"\ntext_base = 0x1000\nfill = 0\nstrip = true\n";
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.get_output().get_runtime(), "ulm-dev");
        assert_eq!(config.get_output().get_text_base(), 0x1000);
        assert_eq!(config.get_output().get_fill(), 0);
        assert!(config.get_output().get_strip());
    }
}
