/*
* epoll hands back one 64-bit word per readiness event. We use it to say which
* registration fired:
*
* 1. The listening socket.
*
* 2. The waker eventfd that workers poke when they hand a connection back.
*
* 3. A client connection, identified by its slot index in the connection table.
*
* The two reserved values live at the very top of the u64 range so every slot
* index a table can hold maps to itself.
*/

const LISTENER_TAG: u64 = u64::MAX;
const WAKER_TAG: u64 = u64::MAX - 1;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Token {
    Listener,
    Waker,
    Conn(usize),
}

#[inline]
pub fn pack_token(token: Token) -> u64 {
    match token {
        Token::Listener => LISTENER_TAG,
        Token::Waker => WAKER_TAG,
        Token::Conn(id) => {
            let id = id as u64;
            debug_assert!(id < WAKER_TAG, "slot id collides with reserved tokens");
            id
        }
    }
}

#[inline]
pub fn unpack_token(tag: u64) -> Token {
    match tag {
        LISTENER_TAG => Token::Listener,
        WAKER_TAG => Token::Waker,
        id => Token::Conn(id as usize),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_tokens_are_distinct_from_slots() {
        assert_eq!(unpack_token(pack_token(Token::Listener)), Token::Listener);
        assert_eq!(unpack_token(pack_token(Token::Waker)), Token::Waker);
        assert_eq!(unpack_token(0), Token::Conn(0));
        assert_eq!(unpack_token(65534), Token::Conn(65534));
    }
}
