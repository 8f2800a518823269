use std::collections::HashSet;
use std::hash::Hash;

/// Whether adding the edge `from -> to` closes a loop, given the current
/// successors of every node.
pub fn would_create_cycle<Node, Neighbors, Iter>(
    from: &Node,
    to: &Node,
    mut neighbors: Neighbors,
) -> bool
where
    Node: Clone + Eq + Hash,
    Neighbors: FnMut(&Node) -> Iter,
    Iter: IntoIterator<Item = Node>,
{
    if from == to {
        return true;
    }
    has_path(to, from, &mut neighbors)
}

fn has_path<Node, Neighbors, Iter>(start: &Node, target: &Node, neighbors: &mut Neighbors) -> bool
where
    Node: Clone + Eq + Hash,
    Neighbors: FnMut(&Node) -> Iter,
    Iter: IntoIterator<Item = Node>,
{
    let mut visited = HashSet::new();
    let mut stack = vec![start.clone()];
    while let Some(current) = stack.pop() {
        if current == *target {
            return true;
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        stack.extend(neighbors(&current));
    }
    false
}

/// Partitions nodes `0..successors.len()` into levels so that every edge
/// goes from a lower level to a strictly higher one. A node sits one level
/// above its deepest predecessor.
///
/// On a cycle, returns one loop as a node path whose last element has an
/// edge back to the first.
pub fn levels(successors: &[Vec<usize>]) -> Result<Vec<Vec<usize>>, Vec<usize>> {
    let n = successors.len();
    let mut in_degree = vec![0_usize; n];
    for succ in successors {
        for &s in succ {
            in_degree[s] += 1;
        }
    }
    let mut level_of = vec![0_usize; n];
    let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut visited = 0;
    let mut levels: Vec<Vec<usize>> = vec![];
    while let Some(node) = ready.pop() {
        visited += 1;
        let level = level_of[node];
        if levels.len() <= level {
            levels.resize_with(level + 1, Vec::new);
        }
        levels[level].push(node);
        for &next in &successors[node] {
            level_of[next] = level_of[next].max(level + 1);
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(next);
            }
        }
    }
    if visited < n {
        let stuck: Vec<usize> = (0..n).filter(|&i| in_degree[i] > 0).collect();
        return Err(find_cycle(successors, &stuck));
    }
    for level in &mut levels {
        level.sort_unstable();
    }
    Ok(levels)
}

/// Walks backwards from a node that could not be leveled until a node
/// repeats. Every such node still has an unleveled predecessor, so the
/// walk always closes a loop.
fn find_cycle(successors: &[Vec<usize>], stuck: &[usize]) -> Vec<usize> {
    let in_stuck: HashSet<usize> = stuck.iter().copied().collect();
    let mut predecessor = vec![None; successors.len()];
    for &from in stuck {
        for &to in &successors[from] {
            if in_stuck.contains(&to) && predecessor[to].is_none() {
                predecessor[to] = Some(from);
            }
        }
    }
    let Some(&start) = stuck.first() else {
        return vec![];
    };
    let mut path = vec![start];
    let mut seen = HashSet::from([start]);
    let mut current = start;
    while let Some(prev) = predecessor[current] {
        if !seen.insert(prev) {
            let from = path.iter().position(|&p| p == prev).unwrap_or(0);
            let mut cycle = path.split_off(from);
            cycle.reverse();
            if let Some(min_at) = cycle.iter().enumerate().min_by_key(|(_, n)| **n).map(|(i, _)| i) {
                cycle.rotate_left(min_at);
            }
            return cycle;
        }
        path.push(prev);
        current = prev;
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn chain() -> HashMap<&'static str, Vec<&'static str>> {
        HashMap::from([
            ("capture", vec!["drums"]),
            ("drums", vec!["bus"]),
            ("bus", vec!["playback"]),
            ("playback", vec![]),
            ("reverb", vec![]),
        ])
    }

    fn successors<'a>(
        graph: &'a HashMap<&'static str, Vec<&'static str>>,
    ) -> impl FnMut(&&'static str) -> Vec<&'static str> + 'a {
        |node| graph.get(node).cloned().unwrap_or_default()
    }

    #[test]
    fn feedback_into_the_chain_is_a_cycle() {
        let graph = chain();
        assert!(would_create_cycle(&"bus", &"drums", successors(&graph)));
        assert!(would_create_cycle(&"playback", &"capture", successors(&graph)));
    }

    #[test]
    fn side_branch_is_allowed() {
        let graph = chain();
        assert!(!would_create_cycle(&"drums", &"reverb", successors(&graph)));
        assert!(!would_create_cycle(&"reverb", &"bus", successors(&graph)));
        assert!(!would_create_cycle(&"capture", &"playback", successors(&graph)));
    }

    #[test]
    fn self_edge_is_a_cycle() {
        assert!(would_create_cycle(&1, &1, |_: &i32| Vec::new()));
    }

    #[test]
    fn levels_follow_longest_path() {
        // 0 -> 1 -> 3, 0 -> 3, 2 isolated
        let successors = vec![vec![1, 3], vec![3], vec![], vec![]];
        let levels = levels(&successors).unwrap();
        assert_eq!(levels, vec![vec![0, 2], vec![1], vec![3]]);
    }

    #[test]
    fn every_edge_goes_up_a_level() {
        let successors = vec![vec![2], vec![2, 3], vec![4], vec![4], vec![]];
        let levels = levels(&successors).unwrap();
        let mut level_of = HashMap::new();
        for (l, nodes) in levels.iter().enumerate() {
            for n in nodes {
                level_of.insert(*n, l);
            }
        }
        for (from, succ) in successors.iter().enumerate() {
            for to in succ {
                assert!(level_of[&from] < level_of[to]);
            }
        }
    }

    #[test]
    fn levels_report_the_loop() {
        // 0 -> 1 -> 2 -> 1
        let successors = vec![vec![1], vec![2], vec![1]];
        let cycle = levels(&successors).unwrap_err();
        assert_eq!(cycle, vec![1, 2]);
    }

    #[test]
    fn loop_is_found_behind_a_downstream_node() {
        // 0 -> 1 -> 0, 1 -> 2
        let successors = vec![vec![1], vec![2, 0], vec![]];
        let cycle = levels(&successors).unwrap_err();
        assert_eq!(cycle, vec![0, 1]);
    }

    #[test]
    fn empty_graph_has_no_levels() {
        assert!(levels(&[]).unwrap().is_empty());
    }
}
