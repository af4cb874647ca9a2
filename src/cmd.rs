/* ulmld command-line parser
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use crate::context::{Context, Group, StreamItem};

/* use a state machine to analyze command line args */
enum State
{
    ExpectingAnything,
    ExpectingSearchPath,
    ExpectingOutputFile,
    ExpectingConfigFile,
    ExpectingTextSegment,
    WaitingForGroupEnd,
}

/* convert command-line arguments into a native context structure */
pub fn parse_args() -> Context
{
    let mut context = Context::new();
    let mut state = State::ExpectingAnything;
    let mut group = Group::new();

    /* get the command-line arguments as a list of strings, skipping
       the first argument because it's just the program name */
    let arg_array = std::env::args().collect::<Vec<String>>().split_off(1);
    let args = arg_array.as_slice();
    if args.is_empty()
    {
        /* no arguments? bail out with a message hinting at what we'd expect */
        usage_die();
    }

    for arg in args
    {
        match state
        {
            /* argument could be an input file or a switch. figure out
               which it is, and either change state to handle the switch
               or include the file in the processing stream */
            State::ExpectingAnything =>
            {
                if arg == "--end-group" || arg == "-)"
                {
                    crate::fatal_msg!("missing --start-group or -( before {}", arg);
                }
                if arg == "-s"
                {
                    context.set_strip();
                    continue;
                }
                if let Some(dir) = attached_search_path(arg)
                {
                    context.add_search_path(dir);
                    continue;
                }

                match parse_single_arg(arg)
                {
                    (true, Some(next)) => state = next,
                    (false, None) => context.add_to_stream(StreamItem::File(arg.clone())),
                    (_, _) => (),
                }
            }

            /* if we're in a group, keep adding archives to the group */
            State::WaitingForGroupEnd =>
            {
                match parse_single_arg(arg)
                {
                    (true, Some(State::ExpectingAnything)) =>
                    {
                        /* we've left the group, so commit it to the stream
                           and create a blank group for next time */
                        context.add_to_stream(StreamItem::Group(group.clone()));
                        state = State::ExpectingAnything;
                        group = Group::new();
                    }
                    (false, None) => group.add(arg),
                    (_, _) => (),
                }
            }

            /* the argument is expected to be a search path */
            State::ExpectingSearchPath =>
            {
                context.add_search_path(arg);
                state = State::ExpectingAnything;
            }

            /* the argument is expected to be the executable output filename */
            State::ExpectingOutputFile =>
            {
                context.set_output_file(arg);
                state = State::ExpectingAnything;
            }

            /* the argument is expected to be the linker config filename */
            State::ExpectingConfigFile =>
            {
                context.set_config_file(arg);
                state = State::ExpectingAnything;
            }

            /* the argument is expected to be the text load address, in hex */
            State::ExpectingTextSegment =>
            {
                let digits = arg.strip_prefix("0x").unwrap_or(arg);
                match u64::from_str_radix(digits, 16)
                {
                    Ok(addr) => context.set_text_base(addr),
                    Err(_) => crate::fatal_msg!("Bad -textseg address {}", arg),
                }
                state = State::ExpectingAnything;
            }
        }
    }

    if let State::WaitingForGroupEnd = state
    {
        crate::fatal_msg!("--start-group not terminated with --end-group");
    }

    context
}

/* attempt to parse a single argument and return whether or not the arg
   was successfully parsed, and the new state of the parser */
fn parse_single_arg(arg: &str) -> (bool, Option<State>)
{
    /* display minimal help and exit */
    if arg == "--help" { usage_die() }

    /* display version information */
    if arg == "--version" { version_die() }

    /* next command line argument must be a search path */
    if arg == "-L" { return (true, Some(State::ExpectingSearchPath)) }

    /* next command line argument must be an output file name */
    if arg == "-o" { return (true, Some(State::ExpectingOutputFile)) }

    /* next command line argument must be the config filename */
    if arg == "-T" { return (true, Some(State::ExpectingConfigFile)) }

    /* next command line argument must be the text load address */
    if arg == "-textseg" { return (true, Some(State::ExpectingTextSegment)) }

    /* put us into group mode. if we were already in group mode, continue */
    if arg == "--start-group" || arg == "-(" { return (true, Some(State::WaitingForGroupEnd)) }

    /* take us out of group, if we're in one */
    if arg == "--end-group" || arg == "-)" { return (true, Some(State::ExpectingAnything)) }

    (false, None) /* nothing handled and no change to state */
}

/* the -L flag also accepts its directory attached, eg -L/usr/ulm/lib.
   note the capital: -lNAME library references pass through as inputs */
fn attached_search_path(arg: &str) -> Option<&str>
{
    if arg.len() > 2 && arg.starts_with("-L")
    {
        Some(&arg[2..])
    }
    else
    {
        None
    }
}

/* software information and error messages */
fn version_die() -> !
{
    crate::fatal_msg!("version {} by {}", env!("CARGO_PKG_VERSION"), env!("CARGO_PKG_AUTHORS"))
}

fn usage_die() -> !
{
    crate::fatal_msg!("usage: [-o output] [-textseg addr] [-T config] [-s] [-L dir] [--start-group archives... --end-group] file...")
}
